//! The on-disk layout of a database.
//!
//! ```text
//! <root>/settings.toml          settings, see [`DatabaseSettings`]
//! <root>/data/revtree.store     the page file, see [`crate::io::file`]
//! <root>/revlog/revisions.log   the revision log, see [`RevisionLog`]
//! <root>/.lock                  advisory directory lock
//! ```

use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use revtree_core::UberPage;

use crate::{
    io::{self, file::FileFactory, IoFactory},
    Options, Result, UsageError,
};

mod flock;
pub mod revlog;
pub mod settings;

pub use revlog::{RevisionInfo, RevisionLog};
pub use settings::{DatabaseSettings, Version, CURRENT_VERSION, MIN_SUPPORTED_VERSION};

pub const SETTINGS_FILE: &str = "settings.toml";
pub const DATA_DIR: &str = "data";
pub const PAGE_FILE: &str = "revtree.store";
pub const REVLOG_DIR: &str = "revlog";
pub const REVLOG_FILE: &str = "revisions.log";

/// The paths making up a database and whether each is a directory.
fn layout(root: &Path) -> [(PathBuf, bool); 5] {
    [
        (root.join(SETTINGS_FILE), false),
        (root.join(DATA_DIR), true),
        (root.join(DATA_DIR).join(PAGE_FILE), false),
        (root.join(REVLOG_DIR), true),
        (root.join(REVLOG_DIR).join(REVLOG_FILE), false),
    ]
}

/// Whether a database exists at `root`.
pub fn exists(root: &Path) -> bool {
    root.join(SETTINGS_FILE).exists()
}

/// Check that every path of the layout exists and has the right kind.
pub fn validate_layout(root: &Path) -> Result<()> {
    for (path, is_dir) in layout(root) {
        let reason = match std::fs::metadata(&path) {
            Err(_) => "missing",
            Ok(meta) if meta.is_dir() != is_dir => {
                if is_dir {
                    "expected a directory"
                } else {
                    "expected a file"
                }
            }
            Ok(_) => continue,
        };
        return Err(UsageError::InvalidStorageLayout { path, reason }.into());
    }
    Ok(())
}

/// An open database directory.
///
/// Holds the directory lock until [`Store::unlock`] or until it is dropped.
pub struct Store {
    root: PathBuf,
    settings: DatabaseSettings,
    factory: Arc<FileFactory>,
    revlog: Mutex<RevisionLog>,
    flock: Mutex<Option<flock::Flock>>,
}

impl Store {
    /// Create the layout and durably commit revision 0: an empty document.
    pub fn create(o: &Options) -> Result<()> {
        o.validate()?;
        let root = &o.path;
        if exists(root) {
            return Err(UsageError::DatabaseExists(root.clone()).into());
        }

        let fresh_root = !root.exists();
        std::fs::create_dir_all(root)?;
        let res = Self::create_layout(o, root);
        if let Err(e) = &res {
            tracing::error!(path = %root.display(), "failed to create database: {e}");
            let _ = std::fs::remove_dir_all(root.join(DATA_DIR));
            let _ = std::fs::remove_dir_all(root.join(REVLOG_DIR));
            if fresh_root {
                let _ = std::fs::remove_dir_all(root);
            }
        }
        res
    }

    fn create_layout(o: &Options, root: &Path) -> Result<()> {
        let _flock = flock::Flock::lock(root)?;
        std::fs::create_dir_all(root.join(DATA_DIR))?;
        std::fs::create_dir_all(root.join(REVLOG_DIR))?;

        let page_file = root.join(DATA_DIR).join(PAGE_FILE);
        FileFactory::create(&page_file)?;
        let mut revlog = RevisionLog::create(&root.join(REVLOG_DIR).join(REVLOG_FILE))?;

        let factory = FileFactory::new(page_file, None);
        let mut writer = factory.writer()?;
        let mut uber = UberPage::bootstrap();
        io::write_tree(&mut *writer, &mut uber.indirect)?;
        let beacon = writer.write_first_reference(&uber)?;
        revlog.append(&RevisionInfo {
            revision: 0,
            timestamp: 0,
            beacon,
        })?;

        // The settings file marks the database as existing, so it goes last.
        DatabaseSettings::from_options(o).store(&root.join(SETTINGS_FILE))?;

        for dir in [root.join(DATA_DIR), root.join(REVLOG_DIR), root.to_path_buf()] {
            File::open(dir)?.sync_all()?;
        }

        tracing::info!(path = %root.display(), "created database");
        Ok(())
    }

    pub fn open(o: &Options) -> Result<Self> {
        o.validate()?;
        let root = o.path.clone();
        if !exists(&root) {
            return Err(UsageError::DatabaseMissing(root).into());
        }

        let flock = flock::Flock::lock(&root)?;
        validate_layout(&root)?;
        let settings = DatabaseSettings::load(&root.join(SETTINGS_FILE))?;
        let factory = Arc::new(FileFactory::new(
            root.join(DATA_DIR).join(PAGE_FILE),
            o.panic_on_sync,
        ));
        let revlog = RevisionLog::open(&root.join(REVLOG_DIR).join(REVLOG_FILE))?;

        Ok(Self {
            root,
            settings,
            factory,
            revlog: Mutex::new(revlog),
            flock: Mutex::new(Some(flock)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    pub fn factory(&self) -> Arc<dyn IoFactory> {
        self.factory.clone()
    }

    pub fn page_file(&self) -> &Path {
        self.factory.path()
    }

    pub fn record_revision(&self, info: &RevisionInfo) -> Result<()> {
        self.revlog.lock().append(info)
    }

    pub fn revisions(&self) -> Result<Vec<RevisionInfo>> {
        self.revlog.lock().read_all()
    }

    /// Give up the directory lock. The store must not be written afterwards.
    pub(crate) fn unlock(&self) {
        self.flock.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn opts(dir: &tempfile::TempDir) -> Options {
        let mut o = Options::new();
        o.path(dir.path().join("db"));
        o
    }

    #[test]
    fn created_layout_validates() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts(&dir);
        Store::create(&o).unwrap();
        validate_layout(&o.path).unwrap();

        let store = Store::open(&o).unwrap();
        let revisions = store.revisions().unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].revision, 0);
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts(&dir);
        Store::create(&o).unwrap();
        assert!(matches!(
            Store::create(&o),
            Err(Error::Usage(UsageError::DatabaseExists(_)))
        ));
    }

    #[test]
    fn failed_create_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts(&dir);
        let blocker = o.path.join(REVLOG_DIR).join(REVLOG_FILE);
        std::fs::create_dir_all(&blocker).unwrap();

        assert!(matches!(Store::create(&o), Err(Error::Io(_))));
        assert!(!exists(&o.path));
        assert!(!o.path.join(DATA_DIR).exists());
        assert!(!o.path.join(REVLOG_DIR).exists());

        Store::create(&o).unwrap();
        validate_layout(&o.path).unwrap();
    }

    #[test]
    fn missing_revlog_is_a_layout_error() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts(&dir);
        Store::create(&o).unwrap();
        std::fs::remove_file(o.path.join(REVLOG_DIR).join(REVLOG_FILE)).unwrap();

        match Store::open(&o) {
            Err(Error::Usage(UsageError::InvalidStorageLayout { path, reason })) => {
                assert!(path.ends_with(REVLOG_FILE));
                assert_eq!(reason, "missing");
            }
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn file_in_place_of_directory_is_a_layout_error() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts(&dir);
        Store::create(&o).unwrap();
        std::fs::remove_dir_all(o.path.join(REVLOG_DIR)).unwrap();
        std::fs::write(o.path.join(REVLOG_DIR), b"").unwrap();

        assert!(matches!(
            Store::open(&o),
            Err(Error::Usage(UsageError::InvalidStorageLayout {
                reason: "expected a directory",
                ..
            }))
        ));
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts(&dir);
        Store::create(&o).unwrap();
        let store = Store::open(&o).unwrap();
        assert!(matches!(
            Store::open(&o),
            Err(Error::Usage(UsageError::DirectoryLocked { .. }))
        ));

        store.unlock();
        Store::open(&o).unwrap();
    }
}
