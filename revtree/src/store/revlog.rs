//! The revision log: one fixed-width record per commit, appended after the commit is durable.
//!
//! The log only serves history queries. The beacons of the page file remain authoritative, so a
//! record torn by a crash is ignored and overwritten by the next append.

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt as _,
    path::Path,
};

use crate::{io::Beacon, Result};

const RECORD_LEN: u64 = 36;

/// A committed revision as recorded in the revision log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionInfo {
    pub revision: u64,
    /// Commit time in milliseconds since the unix epoch.
    pub timestamp: i64,
    /// Where the uber page of the revision was written.
    pub beacon: Beacon,
}

impl RevisionInfo {
    fn encode(&self) -> [u8; RECORD_LEN as usize] {
        let mut buf = [0u8; RECORD_LEN as usize];
        buf[0..8].copy_from_slice(&self.revision.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[16..36].copy_from_slice(&self.beacon.encode());
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        // UNWRAP: callers pass exactly one record.
        let revision = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let timestamp = i64::from_le_bytes(buf[8..16].try_into().unwrap());
        let beacon = Beacon::decode(buf[16..36].try_into().unwrap());
        Self {
            revision,
            timestamp,
            beacon,
        }
    }
}

pub struct RevisionLog {
    file: File,
}

impl RevisionLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, info: &RevisionInfo) -> Result<()> {
        let len = self.file.metadata()?.len();
        let offset = len - len % RECORD_LEN;
        self.file.write_all_at(&info.encode(), offset)?;
        self.file.set_len(offset + RECORD_LEN)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// All complete records in commit order.
    pub fn read_all(&self) -> Result<Vec<RevisionInfo>> {
        let len = self.file.metadata()?.len();
        let mut buf = vec![0u8; (len - len % RECORD_LEN) as usize];
        self.file.read_exact_at(&mut buf, 0)?;
        Ok(buf
            .chunks_exact(RECORD_LEN as usize)
            .map(RevisionInfo::decode)
            .collect())
    }
}
