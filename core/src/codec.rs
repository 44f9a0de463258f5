//! Little-endian helpers shared by the page and node codecs.

use std::{fmt, io::Read};

/// Failure to decode a page or node from its byte representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended before the value was complete.
    Truncated,
    /// An enum tag had no known meaning.
    UnknownTag { what: &'static str, tag: u8 },
    /// The bytes decoded, but describe an impossible value.
    Invalid(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "input truncated"),
            DecodeError::UnknownTag { what, tag } => write!(f, "unknown {what} tag {tag}"),
            DecodeError::Invalid(what) => write!(f, "invalid {what}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Failure to encode a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A child reference has not been written yet, so it has no address to serialize.
    UnpersistedReference,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::UnpersistedReference => {
                write!(f, "child reference must be written before its parent")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// `None` of an optional node key is stored as this value.
pub(crate) const NONE_KEY: u64 = u64::MAX;

pub(crate) fn read_array<const N: usize>(r: &mut impl Read) -> Result<[u8; N], DecodeError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|_| DecodeError::Truncated)?;
    Ok(buf)
}

pub(crate) fn read_u8(r: &mut impl Read) -> Result<u8, DecodeError> {
    Ok(read_array::<1>(r)?[0])
}

pub(crate) fn read_u32(r: &mut impl Read) -> Result<u32, DecodeError> {
    Ok(u32::from_le_bytes(read_array(r)?))
}

pub(crate) fn read_u64(r: &mut impl Read) -> Result<u64, DecodeError> {
    Ok(u64::from_le_bytes(read_array(r)?))
}

pub(crate) fn read_i64(r: &mut impl Read) -> Result<i64, DecodeError> {
    Ok(i64::from_le_bytes(read_array(r)?))
}

pub(crate) fn read_opt_u64(r: &mut impl Read) -> Result<Option<u64>, DecodeError> {
    let v = read_u64(r)?;
    Ok((v != NONE_KEY).then_some(v))
}

/// Read a `u32` length prefix followed by that many bytes.
pub(crate) fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>, DecodeError> {
    let len = read_u32(r)? as usize;
    let mut buf = Vec::new();
    Read::take(&mut *r, len as u64)
        .read_to_end(&mut buf)
        .map_err(|_| DecodeError::Truncated)?;
    if buf.len() != len {
        return Err(DecodeError::Truncated);
    }
    Ok(buf)
}

pub(crate) fn write_opt_u64(buf: &mut Vec<u8>, v: Option<u64>) {
    buf.extend_from_slice(&v.unwrap_or(NONE_KEY).to_le_bytes());
}

pub(crate) fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}
