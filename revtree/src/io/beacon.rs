/// The size of an encoded beacon in bytes.
pub const BEACON_LEN: u64 = 20;

/// Locates the uber page of the last commit: where it starts, how long it is and its checksum.
///
/// Every commit writes the beacon twice. First after the uber page at the end of the page file,
/// then over the primary beacon at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub offset: u64,
    pub size: u32,
    pub checksum: u64,
}

impl Beacon {
    pub fn encode(&self) -> [u8; BEACON_LEN as usize] {
        let mut buf = [0u8; BEACON_LEN as usize];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.size.to_le_bytes());
        buf[12..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; BEACON_LEN as usize]) -> Self {
        // UNWRAP: the slices have the exact length of the integers.
        let offset = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let checksum = u64::from_le_bytes(buf[12..20].try_into().unwrap());
        Self {
            offset,
            size,
            checksum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_little_endian() {
        let beacon = Beacon {
            offset: 0x0102,
            size: 3,
            checksum: u64::MAX,
        };
        let buf = beacon.encode();
        assert_eq!(&buf[0..2], &[0x02, 0x01]);
        assert_eq!(buf[8], 3);
        assert!(buf[12..].iter().all(|b| *b == 0xff));
        assert_eq!(Beacon::decode(&buf), beacon);
    }
}
