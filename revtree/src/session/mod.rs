//! Sessions: the entry point for transactions on an open database.
//!
//! A session admits at most `max_readers` read transactions and `max_writers` write
//! transactions at a time. Readers wait for a free slot; writers fail immediately. Every open
//! transaction is registered with the session so that commits can reach the logs of other
//! writers and so that closing the session can close them all.

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use revtree_core::UberPage;
use threadpool::ThreadPool;

use crate::{
    hashing::HashKind,
    lock_manager::LockManager,
    metrics::Metrics,
    page_cache::PageCache,
    store::{DatabaseSettings, RevisionInfo, Store},
    txn::{
        log::TransactionLog,
        state::{Context, ReadState},
        write_state::WriteState,
        AutoCommit, LockedWriteTransaction, ReadTransaction, WriteTransaction,
    },
    ConcurrencyError, Options, Result, UsageError,
};

mod admission;
mod commit;

use admission::Admission;

enum TxnKind {
    Read { revision: u64 },
    /// `revision` is the committed revision the transaction currently reads from.
    Write { log: Arc<TransactionLog>, revision: u64 },
}

impl TxnKind {
    fn revision(&self) -> u64 {
        match self {
            TxnKind::Read { revision } | TxnKind::Write { revision, .. } => *revision,
        }
    }
}

struct TxnEntry {
    kind: TxnKind,
    /// Shared with the transaction, set when the session closes it.
    closed: Arc<AtomicBool>,
}

pub(crate) struct Shared {
    store: Arc<Store>,
    pub(crate) ctx: Context,
    pub(crate) hash_kind: HashKind,
    max_writers: usize,
    readers: Admission,
    writers: Admission,
    next_txn_id: AtomicU64,
    node_keys: Arc<AtomicU64>,
    head: RwLock<Arc<UberPage>>,
    commit_lock: Mutex<()>,
    transactions: Mutex<FxHashMap<u64, TxnEntry>>,
    sync_pool: Mutex<ThreadPool>,
    pub(crate) locks: LockManager,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn head(&self) -> Arc<UberPage> {
        self.head.read().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn register(&self, kind: TxnKind, closed: Arc<AtomicBool>) -> Result<u64> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut transactions = self.transactions.lock();
        if self.is_closed() {
            return Err(UsageError::SessionClosed.into());
        }
        if transactions.contains_key(&id) {
            return Err(ConcurrencyError::DuplicateTransactionId(id).into());
        }
        transactions.insert(id, TxnEntry { kind, closed });
        Ok(id)
    }

    /// Forget a transaction and give back its admission slot. Does nothing if the session already
    /// closed it.
    ///
    /// Cached pages of the transaction's revision are dropped unless another transaction still
    /// reads that revision.
    pub(crate) fn release(&self, id: u64) {
        let mut transactions = self.transactions.lock();
        let Some(entry) = transactions.remove(&id) else {
            return;
        };
        let revision = entry.kind.revision();
        let unused = !transactions.values().any(|e| e.kind.revision() == revision);
        drop(transactions);
        if unused {
            self.ctx.cache.clear_revision(revision);
        }
        match entry.kind {
            TxnKind::Read { .. } => self.readers.release(),
            TxnKind::Write { .. } => {
                self.locks.release_all(id);
                self.writers.release();
            }
        }
    }

    /// Record that write transaction `id` reads from `revision` now. Cached pages of the revision
    /// it left are dropped unless another transaction still reads it.
    pub(crate) fn rebind(&self, id: u64, revision: u64) {
        let mut transactions = self.transactions.lock();
        let Some(TxnEntry {
            kind: TxnKind::Write { revision: bound, .. },
            ..
        }) = transactions.get_mut(&id)
        else {
            return;
        };
        let previous = std::mem::replace(bound, revision);
        if previous == revision {
            return;
        }
        let unused = !transactions.values().any(|e| e.kind.revision() == previous);
        drop(transactions);
        if unused {
            self.ctx.cache.clear_revision(previous);
        }
    }

    fn other_logs(&self, id: u64) -> Vec<(u64, Arc<TransactionLog>)> {
        self.transactions
            .lock()
            .iter()
            .filter(|(other, _)| **other != id)
            .filter_map(|(other, entry)| match &entry.kind {
                TxnKind::Write { log, .. } => Some((*other, log.clone())),
                TxnKind::Read { .. } => None,
            })
            .collect()
    }

    pub(crate) fn check_revision(&self, revision: u64) -> Result<()> {
        let last = self.head().revision();
        if revision > last {
            return Err(UsageError::RevisionOutOfRange {
                requested: revision,
                last,
            }
            .into());
        }
        Ok(())
    }

    /// A read state bound to `revision` of the newest uber page, or to the newest revision.
    pub(crate) fn read_state(&self, revision: Option<u64>) -> Result<ReadState> {
        let head = self.head();
        let revision = revision.unwrap_or(head.revision());
        ReadState::open(
            self.ctx.clone(),
            self.store.factory().reader()?,
            head,
            revision,
        )
    }

    fn write_state(&self, log: Arc<TransactionLog>) -> Result<WriteState> {
        let read = self.read_state(None)?;
        let writer = self.store.factory().writer()?;
        Ok(WriteState::new(read, log, writer, self.node_keys.clone()))
    }
}

/// A handle to an open session. Clones share the session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn open(store: Arc<Store>, o: &Options) -> Result<Self> {
        let settings = store.settings().clone();
        let indirect_cache_pages = NonZeroUsize::new(o.indirect_cache_pages).ok_or_else(|| {
            UsageError::InvalidOption("indirect_cache_pages must be at least 1".to_string())
        })?;
        let ctx = Context {
            revisioning: settings.revisioning,
            milestone: settings.milestone,
            cache: Arc::new(PageCache::new()),
            metrics: Metrics::new(o.metrics),
            indirect_cache_pages,
        };

        let mut reader = store.factory().reader()?;
        let (_, uber) = reader.read_first_reference()?;
        let head = Arc::new(uber);
        let state = ReadState::open(ctx.clone(), reader, head.clone(), head.revision())?;
        let next_node_key = state.root().max_node_key + 1;
        drop(state);

        tracing::debug!(
            revision = head.revision(),
            next_node_key,
            revisioning = ?settings.revisioning,
            "opened session"
        );

        Ok(Session {
            shared: Arc::new(Shared {
                store,
                ctx,
                hash_kind: settings.hash_kind,
                max_writers: o.max_writers,
                readers: Admission::new(o.max_readers),
                writers: Admission::new(o.max_writers),
                next_txn_id: AtomicU64::new(1),
                node_keys: Arc::new(AtomicU64::new(next_node_key)),
                head: RwLock::new(head),
                commit_lock: Mutex::new(()),
                transactions: Mutex::new(FxHashMap::default()),
                sync_pool: Mutex::new(ThreadPool::with_name(
                    "revtree-sync".into(),
                    o.sync_workers,
                )),
                locks: LockManager::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    fn assert_open(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(UsageError::SessionClosed.into());
        }
        Ok(())
    }

    /// Begin a read transaction on `revision`, or on the newest revision if `None`.
    ///
    /// Blocks while `max_readers` read transactions are open.
    pub fn begin_read(&self, revision: Option<u64>) -> Result<ReadTransaction> {
        self.open_read(revision, None)
    }

    /// Like [`Session::begin_read`], but gives up after waiting for `timeout`.
    pub fn begin_read_timeout(
        &self,
        revision: Option<u64>,
        timeout: Duration,
    ) -> Result<ReadTransaction> {
        self.open_read(revision, Some(timeout))
    }

    fn open_read(&self, revision: Option<u64>, timeout: Option<Duration>) -> Result<ReadTransaction> {
        self.assert_open()?;
        let revision = revision.unwrap_or_else(|| self.shared.head().revision());
        self.shared.check_revision(revision)?;

        self.shared.readers.acquire(timeout)?;
        let closed = Arc::new(AtomicBool::new(false));
        let id = match self
            .shared
            .register(TxnKind::Read { revision }, closed.clone())
        {
            Ok(id) => id,
            Err(e) => {
                self.shared.readers.release();
                return Err(e);
            }
        };

        match self.shared.read_state(Some(revision)) {
            Ok(state) => {
                tracing::trace!(txn = id, revision, "began read transaction");
                ReadTransaction::new(id, self.clone(), state, closed)
            }
            Err(e) => {
                self.shared.release(id);
                Err(e)
            }
        }
    }

    /// Begin a write transaction on the newest revision which never commits on its own.
    ///
    /// Fails immediately if `max_writers` write transactions are open.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        self.begin_write_with(0, Duration::ZERO)
    }

    /// Begin a write transaction which commits on its own after `max_node_count` modifications
    /// or once `max_time` passed since its last commit. Zero disables either trigger.
    pub fn begin_write_with(
        &self,
        max_node_count: u64,
        max_time: Duration,
    ) -> Result<WriteTransaction> {
        self.assert_open()?;
        if !self.shared.writers.try_acquire() {
            return Err(UsageError::WriterLimitReached {
                max: self.shared.max_writers,
            }
            .into());
        }

        let closed = Arc::new(AtomicBool::new(false));
        let log = Arc::new(TransactionLog::default());
        let kind = TxnKind::Write {
            log: log.clone(),
            revision: self.shared.head().revision(),
        };
        let id = match self.shared.register(kind, closed.clone()) {
            Ok(id) => id,
            Err(e) => {
                self.shared.writers.release();
                return Err(e);
            }
        };

        match self.shared.write_state(log) {
            Ok(state) => {
                self.shared.rebind(id, state.read.revision());
                tracing::trace!(txn = id, revision = state.revision(), "began write transaction");
                let auto_commit = AutoCommit::new(max_node_count, max_time);
                WriteTransaction::new(id, self.clone(), state, closed, auto_commit)
            }
            Err(e) => {
                self.shared.release(id);
                Err(e)
            }
        }
    }

    /// Begin a write transaction which locks the subtree of every node it modifies.
    pub fn begin_locked_write(&self) -> Result<LockedWriteTransaction> {
        Ok(LockedWriteTransaction::new(self.begin_write()?))
    }

    pub fn last_committed_revision(&self) -> u64 {
        self.shared.head().revision()
    }

    pub fn settings(&self) -> &DatabaseSettings {
        self.shared.store.settings()
    }

    /// Every committed revision, oldest first.
    pub fn revisions(&self) -> Result<Vec<RevisionInfo>> {
        self.shared.store.revisions()
    }

    pub fn metrics(&self) -> Metrics {
        self.shared.ctx.metrics.clone()
    }

    pub fn open_transactions(&self) -> usize {
        self.shared.transactions.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Close every open transaction and refuse new ones.
    ///
    /// Uncommitted changes of open write transactions are discarded. Waiting readers fail with
    /// [`ConcurrencyError::AdmissionInterrupted`].
    pub fn close(&self) -> Result<()> {
        let _commit = self.shared.commit_lock.lock();
        let entries: Vec<(u64, TxnEntry)> = {
            let mut transactions = self.shared.transactions.lock();
            if self.shared.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            transactions.drain().collect()
        };

        self.shared.readers.interrupt();
        self.shared.writers.interrupt();
        for (id, entry) in entries {
            entry.closed.store(true, Ordering::Release);
            if let TxnKind::Write { log, .. } = entry.kind {
                let pages = log.lock().len();
                if pages > 0 {
                    tracing::warn!(txn = id, pages, "discarding uncommitted changes on close");
                }
                log.clear();
                self.shared.locks.release_all(id);
            }
        }

        self.shared.ctx.cache.clear();
        self.shared.sync_pool.lock().join();
        if self.shared.ctx.metrics.snapshot().is_some() {
            self.shared.ctx.metrics.log();
        }
        tracing::debug!(path = %self.shared.store.root().display(), "closed session");
        Ok(())
    }
}
