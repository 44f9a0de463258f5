//! A cross-platform advisory lock on the database directory.

use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use fs2::FileExt as _;

use crate::{Result, UsageError};

pub const LOCK_FILENAME: &str = ".lock";

/// Held for as long as a process has the database open.
pub struct Flock {
    lock_fd: File,
}

impl Flock {
    pub fn lock(db_dir: &Path) -> Result<Self> {
        let lock_fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_dir.join(LOCK_FILENAME))?;

        match lock_fd.try_lock_exclusive() {
            Ok(_) => Ok(Self { lock_fd }),
            Err(_) => Err(UsageError::DirectoryLocked {
                path: db_dir.to_path_buf(),
                source: fs2::lock_contended_error(),
            }
            .into()),
        }
    }
}

impl Drop for Flock {
    fn drop(&mut self) {
        if let Err(e) = self.lock_fd.unlock() {
            tracing::warn!("failed to unlock directory lock: {e}");
        }
    }
}
