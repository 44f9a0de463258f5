use std::path::PathBuf;

use crate::{HashKind, Revisioning};

/// Options when creating or opening a [`crate::Database`].
#[derive(Clone)]
pub struct Options {
    /// The root directory of the database.
    pub(crate) path: PathBuf,
    pub(crate) max_readers: usize,
    pub(crate) max_writers: usize,
    pub(crate) revisioning: Revisioning,
    pub(crate) milestone: u32,
    pub(crate) hash_kind: HashKind,
    /// Enable or disable metrics collection.
    pub(crate) metrics: bool,
    pub(crate) indirect_cache_pages: usize,
    pub(crate) sync_workers: usize,
    pub(crate) panic_on_sync: Option<PanicOnSyncMode>,
}

impl Options {
    /// Create a new `Options` instance with the default values.
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("revtree_db"),
            max_readers: 128,
            max_writers: 1,
            revisioning: Revisioning::Incremental,
            milestone: 4,
            hash_kind: HashKind::Rolling,
            metrics: false,
            indirect_cache_pages: 256,
            sync_workers: 2,
            panic_on_sync: None,
        }
    }

    /// Set the root directory of the database.
    pub fn path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Set the maximum number of concurrently open read transactions.
    ///
    /// Further `begin_read` calls block until a reader closes.
    ///
    /// Default: 128.
    pub fn max_readers(&mut self, max_readers: usize) {
        self.max_readers = max_readers;
    }

    /// Set the maximum number of concurrently open write transactions.
    ///
    /// Further `begin_write` calls fail immediately.
    ///
    /// Default: 1.
    pub fn max_writers(&mut self, max_writers: usize) {
        self.max_writers = max_writers;
    }

    /// Set the strategy used to store node page versions.
    ///
    /// Only used when the database is created. An existing database keeps its strategy.
    ///
    /// Default: incremental.
    pub fn revisioning(&mut self, revisioning: Revisioning) {
        self.revisioning = revisioning;
    }

    /// Set the number of node page versions after which a page is stored in full again.
    ///
    /// Only used when the database is created. Must be at least 1.
    ///
    /// Default: 4.
    pub fn milestone(&mut self, milestone: u32) {
        self.milestone = milestone;
    }

    /// Set how subtree hashes are maintained.
    ///
    /// Only used when the database is created.
    ///
    /// Default: rolling.
    pub fn hash_kind(&mut self, hash_kind: HashKind) {
        self.hash_kind = hash_kind;
    }

    /// Set metrics collection on or off.
    ///
    /// Default: off.
    pub fn metrics(&mut self, metrics: bool) {
        self.metrics = metrics;
    }

    /// Set the number of indirect and revision root pages every transaction keeps in memory.
    ///
    /// Default: 256.
    pub fn indirect_cache_pages(&mut self, pages: usize) {
        self.indirect_cache_pages = pages;
    }

    /// Set the number of threads used to propagate committed node pages to other open write
    /// transactions.
    ///
    /// Must be more than 0.
    ///
    /// Default: 2.
    pub fn sync_workers(&mut self, sync_workers: usize) {
        assert!(sync_workers > 0);
        self.sync_workers = sync_workers;
    }

    /// Panic during commit at the given point.
    ///
    /// Useful to test crash recovery and will just cause your DB to be unusable otherwise.
    pub fn panic_on_sync(&mut self, mode: PanicOnSyncMode) {
        self.panic_on_sync = Some(mode);
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        let mut errors = Vec::new();
        if self.max_readers == 0 {
            errors.push("max_readers must be at least 1");
        }
        if self.max_writers == 0 {
            errors.push("max_writers must be at least 1");
        }
        if self.milestone == 0 {
            errors.push("milestone must be at least 1");
        }
        if self.indirect_cache_pages == 0 {
            errors.push("indirect_cache_pages must be at least 1");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(crate::UsageError::InvalidOption(errors.join(", ")).into())
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

/// Modes for panicking during commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanicOnSyncMode {
    /// After the page chain and the uber page are written, before the trailing beacon.
    PostPages,
    /// After the trailing beacon is durable, before the primary beacon is overwritten.
    PostTrailingBeacon,
}
