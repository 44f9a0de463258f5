//! Errors surfaced by the storage engine.
//!
//! Every failure falls into one of four families. None of them is fatal to the process and the
//! engine never retries on its own: the caller decides whether to abort, retry or give up.

use std::{io, path::PathBuf};

use revtree_core::{DecodeError, EncodeError, NodeKey, TreeError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Durable storage could not be read or written.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The caller asked for something the current state does not permit.
    #[error("usage failure: {0}")]
    Usage(#[from] UsageError),

    /// Coordination between transactions failed.
    #[error("concurrency failure: {0}")]
    Concurrency(#[from] ConcurrencyError),

    /// Stored data contradicts itself.
    #[error("consistency failure: {0}")]
    Consistency(#[from] ConsistencyError),
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("revision {requested} is out of range, last committed revision is {last}")]
    RevisionOutOfRange { requested: u64, last: u64 },

    #[error("transaction {0} is closed")]
    TransactionClosed(u64),

    #[error("session is closed")]
    SessionClosed,

    #[error("no writer slot available, {max} write transactions already open")]
    WriterLimitReached { max: usize },

    #[error("transaction {id} has {modifications} uncommitted modifications, commit or abort first")]
    PendingModifications { id: u64, modifications: u64 },

    #[error("node {0} does not exist")]
    NodeNotFound(NodeKey),

    #[error("the document root can not be removed")]
    RemoveDocumentRoot,

    #[error("{operation} is not permitted on a {node_type} node")]
    InvalidNodeType {
        operation: &'static str,
        node_type: &'static str,
    },

    #[error("key {0} exceeds the addressable range")]
    KeyOutOfRange(u64),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("storage layout at {path} is invalid: {reason}")]
    InvalidStorageLayout { path: PathBuf, reason: &'static str },

    #[error("a database already exists at {0}")]
    DatabaseExists(PathBuf),

    #[error("no database exists at {0}")]
    DatabaseMissing(PathBuf),

    #[error("database at {0} is open")]
    DatabaseOpen(PathBuf),

    #[error("database at {0} was closed")]
    DatabaseClosed(PathBuf),

    #[error("directory {path} is locked by another process: {source}")]
    DirectoryLocked { path: PathBuf, source: io::Error },
}

#[derive(Debug, Error)]
pub enum ConcurrencyError {
    #[error("admission wait was interrupted by session close")]
    AdmissionInterrupted,

    #[error("admission wait timed out")]
    AdmissionTimedOut,

    #[error("transaction id {0} was generated twice")]
    DuplicateTransactionId(u64),

    #[error("propagating page {page_key} to transaction {txn} failed")]
    Propagation { page_key: u64, txn: u64 },

    #[error("node {node} is locked by transaction {owner}")]
    LockConflict { node: NodeKey, owner: u64 },

    #[error("name key {0} was bound to different names by concurrent transactions")]
    NameCollision(u32),
}

#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("primary beacon {primary:?} disagrees with trailing beacon {secondary:?}")]
    BeaconMismatch {
        primary: crate::io::Beacon,
        secondary: crate::io::Beacon,
    },

    #[error("page file is too short to hold beacons")]
    MissingBeacon,

    #[error("checksum mismatch for page at offset {offset}")]
    PageChecksum { offset: u64 },

    #[error("stored settings checksum {stored:#x} does not match computed {computed:#x}")]
    SettingsChecksum { stored: u64, computed: u64 },

    #[error("stored version {stored} is older than the minimum supported {required}")]
    VersionTooOld { stored: String, required: String },

    #[error("corrupt page: {0}")]
    CorruptPage(#[from] DecodeError),

    #[error("page could not be encoded: {0}")]
    Encode(#[from] EncodeError),

    #[error("corrupt settings: {0}")]
    CorruptSettings(String),

    #[error("indirect tree is malformed: {0}")]
    MalformedTree(String),

    #[error("revision {0} is not reachable from the uber page")]
    MissingRevision(u64),
}

impl From<TreeError> for Error {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::KeyOutOfRange(key) => UsageError::KeyOutOfRange(key).into(),
            other => ConsistencyError::MalformedTree(other.to_string()).into(),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        ConsistencyError::CorruptPage(e).into()
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        ConsistencyError::Encode(e).into()
    }
}
