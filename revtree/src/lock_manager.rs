//! Subtree locks for concurrent write transactions.
//!
//! A lock on a node covers its whole subtree. A transaction may lock a node unless another
//! transaction holds a lock on the node itself, on one of its ancestors or on one of its
//! descendants. Locks are held until the owner releases them all at once.

use fxhash::FxHashMap;
use parking_lot::Mutex;
use revtree_core::NodeKey;

use crate::{ConcurrencyError, Result};

struct Lock {
    owner: u64,
    /// The keys from the document root down to the locked node, inclusive.
    path: Vec<NodeKey>,
}

#[derive(Default)]
pub struct LockManager {
    locks: Mutex<FxHashMap<NodeKey, Lock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the subtree at the last key of `path`, which lists the keys from the document root
    /// down to the node.
    pub fn lock(&self, owner: u64, path: &[NodeKey]) -> Result<()> {
        let Some(&node) = path.last() else {
            return Ok(());
        };
        let mut locks = self.locks.lock();

        for (locked, lock) in locks.iter() {
            if lock.owner == owner {
                continue;
            }
            let covers_node = path.contains(locked);
            let below_node = lock.path.contains(&node);
            if covers_node || below_node {
                tracing::debug!(node, owner, holder = lock.owner, "lock denied");
                return Err(ConcurrencyError::LockConflict {
                    node: *locked,
                    owner: lock.owner,
                }
                .into());
            }
        }

        locks.entry(node).or_insert_with(|| Lock {
            owner,
            path: path.to_vec(),
        });
        Ok(())
    }

    /// Release every lock held by `owner`.
    pub fn release_all(&self, owner: u64) {
        self.locks.lock().retain(|_, lock| lock.owner != owner);
    }

    /// The owner of the lock on exactly `node`, if any.
    pub fn holder(&self, node: NodeKey) -> Option<u64> {
        self.locks.lock().get(&node).map(|lock| lock.owner)
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
