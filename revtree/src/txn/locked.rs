use revtree_core::{NameKey, Node, NodeKey, NodeType};

use super::{NodeReadTrx, WriteTransaction};
use crate::Result;

/// A write transaction which locks the subtree around every change before making it.
///
/// Locks go through the session's [`crate::LockManager`] and are held until the transaction
/// commits, aborts, reverts or closes. With locks in place, concurrent write transactions on
/// disjoint subtrees commit without overwriting each other's links.
pub struct LockedWriteTransaction {
    inner: WriteTransaction,
}

impl LockedWriteTransaction {
    pub(crate) fn new(inner: WriteTransaction) -> Self {
        LockedWriteTransaction { inner }
    }

    pub fn inner(&self) -> &WriteTransaction {
        &self.inner
    }

    fn lock(&mut self, key: NodeKey) -> Result<()> {
        let path = self.inner.path_to(key)?;
        let id = self.inner.transaction_id();
        self.inner.session().shared().locks.lock(id, &path)
    }

    fn lock_current(&mut self) -> Result<()> {
        let key = self.inner.node()?.key;
        self.lock(key)
    }

    /// Siblings change along with the parent, so the parent's subtree is locked.
    fn lock_parent(&mut self) -> Result<()> {
        let node = self.inner.node()?;
        let parent = node.parent.filter(|_| node.node_type() != NodeType::DocumentRoot);
        match parent {
            Some(parent) => self.lock(parent),
            None => Ok(()),
        }
    }

    fn release_locks(&self) {
        let id = self.inner.transaction_id();
        self.inner.session().shared().locks.release_all(id);
    }

    pub fn insert_element_as_first_child(&mut self, name: &str, uri: &str) -> Result<NodeKey> {
        self.lock_current()?;
        self.inner.insert_element_as_first_child(name, uri)
    }

    pub fn insert_element_as_right_sibling(&mut self, name: &str, uri: &str) -> Result<NodeKey> {
        self.lock_parent()?;
        self.inner.insert_element_as_right_sibling(name, uri)
    }

    pub fn insert_text_as_first_child(&mut self, value: &[u8]) -> Result<NodeKey> {
        self.lock_current()?;
        self.inner.insert_text_as_first_child(value)
    }

    pub fn insert_text_as_right_sibling(&mut self, value: &[u8]) -> Result<NodeKey> {
        self.lock_parent()?;
        self.inner.insert_text_as_right_sibling(value)
    }

    pub fn insert_attribute(&mut self, name: &str, uri: &str, value: &[u8]) -> Result<NodeKey> {
        self.lock_current()?;
        self.inner.insert_attribute(name, uri, value)
    }

    pub fn insert_namespace(&mut self, prefix: &str, uri: &str) -> Result<NodeKey> {
        self.lock_current()?;
        self.inner.insert_namespace(prefix, uri)
    }

    pub fn remove(&mut self) -> Result<()> {
        self.lock_parent()?;
        self.inner.remove()
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.lock_current()?;
        self.inner.set_name(name)
    }

    pub fn set_uri(&mut self, uri: &str) -> Result<()> {
        self.lock_current()?;
        self.inner.set_uri(uri)
    }

    pub fn set_value(&mut self, value: &[u8]) -> Result<()> {
        self.lock_current()?;
        self.inner.set_value(value)
    }

    /// Commit and release every lock. If the commit fails with the changes still pending, the
    /// locks stay in place.
    pub fn commit(&mut self) -> Result<()> {
        let res = self.inner.commit();
        if res.is_ok() || !self.inner.has_changes() {
            self.release_locks();
        }
        res
    }

    pub fn abort(&mut self) -> Result<()> {
        let res = self.inner.abort();
        self.release_locks();
        res
    }

    pub fn revert_to(&mut self, revision: u64) -> Result<()> {
        self.inner.revert_to(revision)?;
        self.release_locks();
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    pub fn modification_count(&self) -> u64 {
        self.inner.modification_count()
    }
}

impl NodeReadTrx for LockedWriteTransaction {
    fn transaction_id(&self) -> u64 {
        self.inner.transaction_id()
    }

    fn revision_number(&self) -> Result<u64> {
        self.inner.revision_number()
    }

    fn revision_timestamp(&self) -> Result<i64> {
        self.inner.revision_timestamp()
    }

    fn max_node_key(&self) -> Result<u64> {
        self.inner.max_node_key()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn node(&self) -> Result<&Node> {
        self.inner.node()
    }

    fn move_to(&mut self, key: NodeKey) -> Result<bool> {
        self.inner.move_to(key)
    }

    fn name_for_key(&self, key: NameKey) -> Result<Option<String>> {
        self.inner.name_for_key(key)
    }

    fn key_for_name(&self, name: &str) -> Result<Option<NameKey>> {
        self.inner.key_for_name(name)
    }
}
