//! Write-side transaction state.
//!
//! Node edits never touch committed pages. The first edit of a node page pulls a
//! [`NodePageContainer`] for it into the [`TransactionLog`]; every later read of that page is
//! answered from the container. The indirect trees are only copied at commit.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use revtree_core::{
    addressing::{node_page_offset, MAX_KEY},
    node_page_key, NameKey, Node, NodeKey, UberPage,
};

use super::{
    log::{LogEntry, TransactionLog},
    names,
    state::ReadState,
};
use crate::{io::Writer, Result, UsageError};

pub(crate) struct WriteState {
    /// Bound to the revision the transaction reads from.
    pub read: ReadState,
    pub log: Arc<TransactionLog>,
    /// Names created by the transaction.
    pub names: BTreeMap<NameKey, String>,
    /// The highest node key handed out to this transaction or present in its base revision.
    pub max_node_key: u64,
    pub writer: Box<dyn Writer>,
    node_keys: Arc<AtomicU64>,
}

impl WriteState {
    pub fn new(
        read: ReadState,
        log: Arc<TransactionLog>,
        writer: Box<dyn Writer>,
        node_keys: Arc<AtomicU64>,
    ) -> Self {
        WriteState {
            max_node_key: read.root().max_node_key,
            read,
            log,
            names: BTreeMap::new(),
            writer,
            node_keys,
        }
    }

    /// Drop every uncommitted change.
    pub fn discard(&mut self) {
        self.log.clear();
        self.names.clear();
    }

    /// Discard every uncommitted change and read from `read` from now on.
    pub fn rebind(&mut self, read: ReadState) {
        self.discard();
        self.max_node_key = read.root().max_node_key;
        self.read = read;
    }

    /// The newest committed revision when the state was bound.
    pub fn head(&self) -> &Arc<UberPage> {
        self.read.uber()
    }

    /// The revision a commit of this state would create, unless another commit comes first.
    pub fn revision(&self) -> u64 {
        self.head().revision() + 1
    }

    pub fn has_changes(&self) -> bool {
        !self.log.is_empty() || !self.names.is_empty()
    }

    pub fn node(&mut self, key: NodeKey) -> Result<Option<Node>> {
        let page_key = node_page_key(key);
        if let Some(entry) = self.log.lock().get(&page_key) {
            return Ok(entry
                .container
                .get(node_page_offset(key))
                .filter(|node| !node.is_deleted())
                .cloned());
        }
        self.read.node(key)
    }

    /// Like [`WriteState::node`], but a missing node is an error.
    pub fn existing(&mut self, key: NodeKey) -> Result<Node> {
        self.node(key)?.ok_or_else(|| UsageError::NodeNotFound(key).into())
    }

    /// Hand out a node key which no other transaction of the session will use.
    pub fn allocate_key(&mut self) -> Result<NodeKey> {
        let key = self.node_keys.fetch_add(1, Ordering::SeqCst);
        if node_page_key(key) >= MAX_KEY {
            return Err(UsageError::KeyOutOfRange(key).into());
        }
        self.max_node_key = self.max_node_key.max(key);
        Ok(key)
    }

    fn with_entry<R>(&mut self, key: NodeKey, f: impl FnOnce(&mut LogEntry, usize) -> R) -> Result<R> {
        let page_key = node_page_key(key);
        if !self.log.lock().contains_key(&page_key) {
            let container = self.read.container_for_modification(page_key)?;
            self.log
                .lock()
                .entry(page_key)
                .or_insert_with(|| LogEntry::new(container));
        }
        let mut entries = self.log.lock();
        // UNWRAP: inserted above, and only the owning transaction removes entries.
        let entry = entries.get_mut(&page_key).unwrap();
        Ok(f(entry, node_page_offset(key)))
    }

    /// Store a new or changed node.
    pub fn write(&mut self, node: Node) -> Result<()> {
        self.with_entry(node.key, |entry, offset| entry.write(offset, node))
    }

    pub fn remove(&mut self, key: NodeKey) -> Result<()> {
        self.with_entry(key, |entry, offset| entry.remove(offset, key))
    }

    /// The name bound to `key` by this transaction, its base revision or a transaction which
    /// committed since.
    pub fn name(&self, key: NameKey) -> Option<String> {
        self.names
            .get(&key)
            .cloned()
            .or_else(|| self.read.name(key).map(str::to_string))
            .or_else(|| self.log.committed_name(key))
    }

    pub fn key_for_name(&self, name: &str) -> Option<NameKey> {
        match names::probe(|key| self.name(key), name) {
            (key, true) => Some(key),
            (_, false) => None,
        }
    }

    /// The key of `name`, binding it to a free key first if it is not known yet.
    pub fn create_name(&mut self, name: &str) -> NameKey {
        let (key, bound) = names::probe(|key| self.name(key), name);
        if !bound {
            self.names.insert(key, name.to_string());
        }
        key
    }
}
