//! Transactions and the cursor they share.
//!
//! A transaction always sits on one node, the cursor. Moves return `Ok(false)` and leave the
//! cursor in place when the target does not exist.

use std::time::{Duration, Instant};

use revtree_core::{NameKey, Node, NodeKey, DOCUMENT_ROOT_KEY};

use crate::Result;

pub(crate) mod log;
pub(crate) mod names;
pub(crate) mod state;
pub(crate) mod write_state;

mod locked;
mod read;
mod write;

pub use locked::LockedWriteTransaction;
pub use read::ReadTransaction;
pub use write::WriteTransaction;

/// Read access to the tree of one revision through a cursor.
pub trait NodeReadTrx {
    fn transaction_id(&self) -> u64;

    /// The revision the transaction reads. For a write transaction, the revision its next commit
    /// would create.
    fn revision_number(&self) -> Result<u64>;

    /// Commit time of the revision read, in milliseconds since the unix epoch.
    fn revision_timestamp(&self) -> Result<i64>;

    fn max_node_key(&self) -> Result<u64>;

    fn is_closed(&self) -> bool;

    /// The node under the cursor.
    fn node(&self) -> Result<&Node>;

    /// Move the cursor to the node with `key`.
    fn move_to(&mut self, key: NodeKey) -> Result<bool>;

    fn name_for_key(&self, key: NameKey) -> Result<Option<String>>;

    fn key_for_name(&self, name: &str) -> Result<Option<NameKey>>;

    fn raw_name_for_key(&self, key: NameKey) -> Result<Option<Vec<u8>>> {
        Ok(self.name_for_key(key)?.map(String::into_bytes))
    }

    fn node_key(&self) -> Result<NodeKey> {
        Ok(self.node()?.key)
    }

    fn move_to_document_root(&mut self) -> Result<bool> {
        self.move_to(DOCUMENT_ROOT_KEY)
    }

    fn move_to_parent(&mut self) -> Result<bool> {
        let parent = self.node()?.parent;
        match parent {
            Some(parent) => self.move_to(parent),
            None => Ok(false),
        }
    }

    fn move_to_first_child(&mut self) -> Result<bool> {
        let child = self.node()?.structure().and_then(|s| s.first_child);
        match child {
            Some(child) => self.move_to(child),
            None => Ok(false),
        }
    }

    fn move_to_left_sibling(&mut self) -> Result<bool> {
        let sibling = self.node()?.structure().and_then(|s| s.left_sibling);
        match sibling {
            Some(sibling) => self.move_to(sibling),
            None => Ok(false),
        }
    }

    fn move_to_right_sibling(&mut self) -> Result<bool> {
        let sibling = self.node()?.structure().and_then(|s| s.right_sibling);
        match sibling {
            Some(sibling) => self.move_to(sibling),
            None => Ok(false),
        }
    }

    /// Move to the `index`-th attribute of the element under the cursor.
    fn move_to_attribute(&mut self, index: usize) -> Result<bool> {
        let attribute = self.node()?.attributes().get(index).copied();
        match attribute {
            Some(attribute) => self.move_to(attribute),
            None => Ok(false),
        }
    }

    /// Move to the `index`-th namespace of the element under the cursor.
    fn move_to_namespace(&mut self, index: usize) -> Result<bool> {
        let namespace = self.node()?.namespaces().get(index).copied();
        match namespace {
            Some(namespace) => self.move_to(namespace),
            None => Ok(false),
        }
    }

    /// The name of an element or attribute, or the prefix of a namespace.
    fn name(&self) -> Result<Option<String>> {
        match self.node()?.name_key() {
            Some(key) => self.name_for_key(key),
            None => Ok(None),
        }
    }

    fn uri(&self) -> Result<Option<String>> {
        match self.node()?.uri_key() {
            Some(key) => self.name_for_key(key),
            None => Ok(None),
        }
    }

    fn value(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.node()?.value().map(<[u8]>::to_vec))
    }

    fn child_count(&self) -> Result<u64> {
        Ok(self.node()?.structure().map_or(0, |s| s.child_count))
    }

    fn attribute_count(&self) -> Result<usize> {
        Ok(self.node()?.attributes().len())
    }

    fn namespace_count(&self) -> Result<usize> {
        Ok(self.node()?.namespaces().len())
    }
}

/// When a write transaction commits on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoCommit {
    /// Commit after this many modifications. Zero disables.
    pub max_node_count: u64,
    /// Commit before the next modification once this long passed since the last commit. Zero
    /// disables.
    pub max_time: Duration,
}

impl AutoCommit {
    pub fn new(max_node_count: u64, max_time: Duration) -> Self {
        AutoCommit {
            max_node_count,
            max_time,
        }
    }

    fn due_by_count(&self, modifications: u64) -> bool {
        self.max_node_count > 0 && modifications >= self.max_node_count
    }

    fn due_by_time(&self, modifications: u64, last_commit: Instant) -> bool {
        !self.max_time.is_zero() && modifications > 0 && last_commit.elapsed() >= self.max_time
    }
}
