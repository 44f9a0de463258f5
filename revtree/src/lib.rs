//! An embedded storage engine for versioned trees.
//!
//! Every commit creates a new immutable revision of the tree. Readers see one revision for their
//! whole lifetime, while writers build the next one. Unchanged pages are shared between
//! revisions, and node pages are stored as versions combined according to a [`Revisioning`]
//! strategy.
//!
//! ```no_run
//! use revtree::{Database, NodeReadTrx, Options};
//!
//! # fn main() -> revtree::Result<()> {
//! let mut o = Options::new();
//! o.path("my_db");
//! Database::create(&o)?;
//!
//! let db = Database::open(o)?;
//! let session = db.session()?;
//! let mut wtx = session.begin_write()?;
//! wtx.insert_element_as_first_child("a", "")?;
//! wtx.commit()?;
//! wtx.close()?;
//!
//! let mut rtx = session.begin_read(None)?;
//! rtx.move_to_first_child()?;
//! assert_eq!(rtx.name()?.as_deref(), Some("a"));
//! # Ok(())
//! # }
//! ```

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use store::Store;

pub use revtree_core::{
    NameKey, Node, NodeKey, NodeKind, NodeType, Revisioning, Structure, DOCUMENT_ROOT_KEY,
};

pub use error::{ConcurrencyError, ConsistencyError, Error, Result, UsageError};
pub use hashing::HashKind;
pub use io::{file::read_beacons, Beacon};
pub use lock_manager::LockManager;
pub use metrics::{Metric, Metrics, MetricsSnapshot};
pub use options::{Options, PanicOnSyncMode};
pub use registry::Registry;
pub use session::Session;
pub use store::{DatabaseSettings, RevisionInfo, Version};
pub use txn::{AutoCommit, LockedWriteTransaction, NodeReadTrx, ReadTransaction, WriteTransaction};

mod error;
pub mod hashing;
pub mod io;
mod lock_manager;
mod metrics;
mod options;
mod page_cache;
mod registry;
mod session;
pub mod store;
mod task;
mod txn;

/// Milliseconds since the unix epoch.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

struct Shared {
    store: Arc<Store>,
    options: Options,
    session: Mutex<Option<Session>>,
    closed: AtomicBool,
}

/// An open database. Clones share the database.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Create a database at the path of `o`, holding revision 0: an empty document.
    ///
    /// The revisioning strategy, milestone and hash kind of `o` are fixed for the database's
    /// lifetime.
    pub fn create(o: &Options) -> Result<()> {
        Store::create(o)
    }

    pub fn exists(path: impl AsRef<Path>) -> bool {
        store::exists(path.as_ref())
    }

    /// Open the database at the path of `o`.
    ///
    /// Settings fixed at creation are read from the database and override those of `o`.
    pub fn open(o: Options) -> Result<Self> {
        let store = Store::open(&o)?;
        tracing::info!(
            path = %store.root().display(),
            revisioning = ?store.settings().revisioning,
            milestone = store.settings().milestone,
            "opened database"
        );
        Ok(Database {
            shared: Arc::new(Shared {
                store: Arc::new(store),
                options: o,
                session: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// The database's session, opening a new one if there is none or the last one was closed.
    pub fn session(&self) -> Result<Session> {
        if self.is_closed() {
            return Err(UsageError::DatabaseClosed(self.path().to_path_buf()).into());
        }
        let mut session = self.shared.session.lock();
        if let Some(open) = session.as_ref().filter(|s| !s.is_closed()) {
            return Ok(open.clone());
        }
        let opened = Session::open(self.shared.store.clone(), &self.shared.options)?;
        *session = Some(opened.clone());
        Ok(opened)
    }

    pub fn settings(&self) -> &DatabaseSettings {
        self.shared.store.settings()
    }

    /// The on-disk format version the database was created with.
    pub fn version(&self) -> Version {
        self.settings().version
    }

    pub fn path(&self) -> &Path {
        self.shared.store.root()
    }

    /// Every committed revision, oldest first.
    pub fn revisions(&self) -> Result<Vec<RevisionInfo>> {
        self.shared.store.revisions()
    }

    /// Close the session and release the database directory.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(session) = self.shared.session.lock().take() {
            session.close()?;
        }
        self.shared.store.unlock();
        tracing::info!(path = %self.path().display(), "closed database");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
