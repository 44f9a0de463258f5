use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use revtree_core::{NameKey, Node, NodeKey};

use super::{names, state::ReadState, NodeReadTrx};
use crate::{ConsistencyError, Result, Session, UsageError};

/// A read-only view of one committed revision.
///
/// Closing the transaction, or dropping it, frees its reader slot.
pub struct ReadTransaction {
    id: u64,
    session: Session,
    state: ReadState,
    current: Node,
    closed: Arc<AtomicBool>,
}

impl ReadTransaction {
    pub(crate) fn new(
        id: u64,
        session: Session,
        state: ReadState,
        closed: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut txn = ReadTransaction {
            id,
            session,
            state,
            current: Node::document_root(),
            closed,
        };
        if !txn.move_to_document_root()? {
            return Err(ConsistencyError::MalformedTree(format!(
                "revision {} has no document root",
                txn.state.revision()
            ))
            .into());
        }
        Ok(txn)
    }

    fn assert_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(UsageError::TransactionClosed(self.id).into());
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.session.shared().release(self.id);
            tracing::trace!(txn = self.id, "closed read transaction");
        }
    }
}

impl NodeReadTrx for ReadTransaction {
    fn transaction_id(&self) -> u64 {
        self.id
    }

    fn revision_number(&self) -> Result<u64> {
        self.assert_open()?;
        Ok(self.state.revision())
    }

    fn revision_timestamp(&self) -> Result<i64> {
        self.assert_open()?;
        Ok(self.state.root().timestamp)
    }

    fn max_node_key(&self) -> Result<u64> {
        self.assert_open()?;
        Ok(self.state.root().max_node_key)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn node(&self) -> Result<&Node> {
        self.assert_open()?;
        Ok(&self.current)
    }

    fn move_to(&mut self, key: NodeKey) -> Result<bool> {
        self.assert_open()?;
        match self.state.node(key)? {
            Some(node) => {
                self.current = node;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn name_for_key(&self, key: NameKey) -> Result<Option<String>> {
        self.assert_open()?;
        Ok(self.state.name(key).map(str::to_string))
    }

    fn key_for_name(&self, name: &str) -> Result<Option<NameKey>> {
        self.assert_open()?;
        Ok(match names::probe(|key| self.state.name(key), name) {
            (key, true) => Some(key),
            (_, false) => None,
        })
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        self.close();
    }
}
