use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::{Database, Options, Result, UsageError};

/// Keeps at most one open [`Database`] per directory.
///
/// Opening a path that is already open through the registry returns the same database.
#[derive(Default)]
pub struct Registry {
    open: Mutex<HashMap<PathBuf, Database>>,
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, o: &Options) -> Result<()> {
        Database::create(o)
    }

    pub fn open(&self, o: Options) -> Result<Database> {
        let key = canonical(&o.path);
        let mut open = self.open.lock();
        if let Some(db) = open.get(&key).filter(|db| !db.is_closed()) {
            return Ok(db.clone());
        }
        let db = Database::open(o)?;
        open.insert(key, db.clone());
        Ok(db)
    }

    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        self.open
            .lock()
            .get(&canonical(path.as_ref()))
            .map_or(false, |db| !db.is_closed())
    }

    /// Close the database at `path`. Returns whether it was open.
    pub fn close(&self, path: impl AsRef<Path>) -> Result<bool> {
        let db = self.open.lock().remove(&canonical(path.as_ref()));
        match db {
            Some(db) => {
                let was_open = !db.is_closed();
                db.close()?;
                Ok(was_open)
            }
            None => Ok(false),
        }
    }

    /// Delete the database at `path`. Refused while it is open.
    pub fn truncate(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        let key = canonical(path);
        let mut open = self.open.lock();
        if open.get(&key).map_or(false, |db| !db.is_closed()) {
            return Err(UsageError::DatabaseOpen(key).into());
        }
        open.remove(&key);
        std::fs::remove_dir_all(path)?;
        tracing::info!(path = %path.display(), "truncated database");
        Ok(())
    }
}
