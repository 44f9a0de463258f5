use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use revtree_core::{NameKey, Node, NodeKey, NodeKind, NodeType, DOCUMENT_ROOT_KEY};

use super::{write_state::WriteState, AutoCommit, NodeReadTrx};
use crate::{
    hashing::{self, content_hash, HashKind, PRIME},
    ConsistencyError, Result, Session, UsageError,
};

enum Position {
    FirstChild,
    RightSibling,
}

fn invalid(operation: &'static str, node: &Node) -> crate::Error {
    UsageError::InvalidNodeType {
        operation,
        node_type: node.node_type().name(),
    }
    .into()
}

fn orphan(node: &Node) -> crate::Error {
    ConsistencyError::MalformedTree(format!("node {} has no parent", node.key)).into()
}

/// A transaction which builds the next revision.
///
/// Changes stay private to the transaction until [`WriteTransaction::commit`]. Dropping a
/// transaction with uncommitted changes discards them.
pub struct WriteTransaction {
    id: u64,
    session: Session,
    state: WriteState,
    current: Node,
    closed: Arc<AtomicBool>,
    auto_commit: AutoCommit,
    modifications: u64,
    last_commit: Instant,
}

impl WriteTransaction {
    pub(crate) fn new(
        id: u64,
        session: Session,
        state: WriteState,
        closed: Arc<AtomicBool>,
        auto_commit: AutoCommit,
    ) -> Result<Self> {
        let mut txn = WriteTransaction {
            id,
            session,
            state,
            current: Node::document_root(),
            closed,
            auto_commit,
            modifications: 0,
            last_commit: Instant::now(),
        };
        txn.current = txn.state.existing(DOCUMENT_ROOT_KEY)?;
        Ok(txn)
    }

    /// The number of modifications since the last commit or abort.
    pub fn modification_count(&self) -> u64 {
        self.modifications
    }

    fn assert_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(UsageError::TransactionClosed(self.id).into());
        }
        Ok(())
    }

    fn hash_kind(&self) -> HashKind {
        self.session.shared().hash_kind
    }

    fn begin_modification(&mut self) -> Result<()> {
        self.assert_open()?;
        if self
            .auto_commit
            .due_by_time(self.modifications, self.last_commit)
        {
            tracing::debug!(txn = self.id, modifications = self.modifications, "auto-commit on time");
            self.commit()?;
        }
        // The cursor copy may predate hash updates made by earlier modifications.
        self.current = self.state.existing(self.current.key)?;
        Ok(())
    }

    fn end_modification(&mut self, cursor: NodeKey) -> Result<()> {
        self.current = self.state.existing(cursor)?;
        self.modifications += 1;
        if self.auto_commit.due_by_count(self.modifications) {
            tracing::debug!(txn = self.id, modifications = self.modifications, "auto-commit on count");
            self.commit()?;
        }
        Ok(())
    }

    fn update(&mut self, key: NodeKey, f: impl FnOnce(&mut Node)) -> Result<Node> {
        let mut node = self.state.existing(key)?;
        f(&mut node);
        self.state.write(node.clone())?;
        Ok(node)
    }

    fn initial_hash(&self, node: &Node) -> u64 {
        match self.hash_kind() {
            HashKind::None => 0,
            HashKind::Rolling | HashKind::Postorder => content_hash(node),
        }
    }

    /// Bring the hashes of `start` and its ancestors up to date after the hash of a child of
    /// `start` changed by `delta`.
    fn adapt_hashes(&mut self, start: Option<NodeKey>, delta: u64) -> Result<()> {
        match self.hash_kind() {
            HashKind::None => Ok(()),
            HashKind::Postorder => self.recompute_hashes(start),
            HashKind::Rolling => {
                let mut delta = delta;
                let mut next = start;
                while let Some(key) = next {
                    delta = delta.wrapping_mul(PRIME);
                    let node = self.update(key, |node| node.hash = node.hash.wrapping_add(delta))?;
                    next = node.parent;
                }
                Ok(())
            }
        }
    }

    /// Bring hashes up to date after the content of `key` changed.
    fn adapt_hashes_for_update(&mut self, key: NodeKey, old: &Node, new: &Node) -> Result<()> {
        match self.hash_kind() {
            HashKind::None => Ok(()),
            HashKind::Postorder => self.recompute_hashes(Some(key)),
            HashKind::Rolling => {
                let delta = content_hash(new).wrapping_sub(content_hash(old));
                let node = self.update(key, |node| node.hash = node.hash.wrapping_add(delta))?;
                self.adapt_hashes(node.parent, delta)
            }
        }
    }

    fn recompute_hashes(&mut self, start: Option<NodeKey>) -> Result<()> {
        let mut next = start;
        while let Some(key) = next {
            let mut node = self.state.existing(key)?;
            let mut children = Vec::with_capacity(node.attributes().len());
            let mut child = node.structure().and_then(|s| s.first_child);
            while let Some(child_key) = child {
                let child_node = self.state.existing(child_key)?;
                children.push(child_node.hash);
                child = child_node.structure().and_then(|s| s.right_sibling);
            }
            for key in node.attributes().iter().chain(node.namespaces()) {
                children.push(self.state.existing(*key)?.hash);
            }
            node.hash = hashing::combine(content_hash(&node), children);
            next = node.parent;
            self.state.write(node)?;
        }
        Ok(())
    }

    fn insert_structural(
        &mut self,
        position: Position,
        build: impl FnOnce(&mut WriteState, NodeKey, NodeKey) -> Node,
    ) -> Result<NodeKey> {
        self.begin_modification()?;
        let current = self.current.clone();
        let links = current.structure().cloned().unwrap_or_default();
        let (parent, left, right) = match position {
            Position::FirstChild => match current.node_type() {
                NodeType::DocumentRoot | NodeType::Element => {
                    (current.key, None, links.first_child)
                }
                _ => return Err(invalid("insert as first child", &current)),
            },
            Position::RightSibling => match current.node_type() {
                NodeType::Element | NodeType::Text => (
                    current.parent.ok_or_else(|| orphan(&current))?,
                    Some(current.key),
                    links.right_sibling,
                ),
                _ => return Err(invalid("insert as right sibling", &current)),
            },
        };

        let key = self.state.allocate_key()?;
        let mut node = build(&mut self.state, key, parent);
        if let Some(structure) = node.structure_mut() {
            structure.left_sibling = left;
            structure.right_sibling = right;
        }
        node.hash = self.initial_hash(&node);
        let hash = node.hash;
        self.state.write(node)?;

        self.update(parent, |parent| {
            if let Some(structure) = parent.structure_mut() {
                structure.child_count += 1;
                if left.is_none() {
                    structure.first_child = Some(key);
                }
            }
        })?;
        if let Some(left) = left {
            self.update(left, |left| {
                if let Some(structure) = left.structure_mut() {
                    structure.right_sibling = Some(key);
                }
            })?;
        }
        if let Some(right) = right {
            self.update(right, |right| {
                if let Some(structure) = right.structure_mut() {
                    structure.left_sibling = Some(key);
                }
            })?;
        }

        self.adapt_hashes(Some(parent), hash)?;
        self.end_modification(key)?;
        Ok(key)
    }

    pub fn insert_element_as_first_child(&mut self, name: &str, uri: &str) -> Result<NodeKey> {
        self.insert_structural(Position::FirstChild, |state, key, parent| {
            Node::element(key, parent, state.create_name(name), state.create_name(uri))
        })
    }

    pub fn insert_element_as_right_sibling(&mut self, name: &str, uri: &str) -> Result<NodeKey> {
        self.insert_structural(Position::RightSibling, |state, key, parent| {
            Node::element(key, parent, state.create_name(name), state.create_name(uri))
        })
    }

    pub fn insert_text_as_first_child(&mut self, value: &[u8]) -> Result<NodeKey> {
        self.insert_structural(Position::FirstChild, |_, key, parent| {
            Node::text(key, parent, value.to_vec())
        })
    }

    pub fn insert_text_as_right_sibling(&mut self, value: &[u8]) -> Result<NodeKey> {
        self.insert_structural(Position::RightSibling, |_, key, parent| {
            Node::text(key, parent, value.to_vec())
        })
    }

    fn insert_non_structural(
        &mut self,
        operation: &'static str,
        build: impl FnOnce(&mut WriteState, NodeKey, NodeKey) -> Node,
    ) -> Result<NodeKey> {
        self.begin_modification()?;
        let element = self.current.clone();
        if element.node_type() != NodeType::Element {
            return Err(invalid(operation, &element));
        }

        let key = self.state.allocate_key()?;
        let mut node = build(&mut self.state, key, element.key);
        node.hash = self.initial_hash(&node);
        let hash = node.hash;
        let is_attribute = node.node_type() == NodeType::Attribute;
        self.state.write(node)?;

        self.update(element.key, |element| {
            if let NodeKind::Element {
                attributes,
                namespaces,
                ..
            } = &mut element.kind
            {
                if is_attribute {
                    attributes.push(key);
                } else {
                    namespaces.push(key);
                }
            }
        })?;

        self.adapt_hashes(Some(element.key), hash)?;
        self.end_modification(key)?;
        Ok(key)
    }

    /// Add an attribute to the element under the cursor and move to it.
    pub fn insert_attribute(&mut self, name: &str, uri: &str, value: &[u8]) -> Result<NodeKey> {
        self.insert_non_structural("insert attribute", |state, key, parent| {
            Node::attribute(
                key,
                parent,
                state.create_name(name),
                state.create_name(uri),
                value.to_vec(),
            )
        })
    }

    /// Add a namespace to the element under the cursor and move to it.
    pub fn insert_namespace(&mut self, prefix: &str, uri: &str) -> Result<NodeKey> {
        self.insert_non_structural("insert namespace", |state, key, parent| {
            Node::namespace(key, parent, state.create_name(prefix), state.create_name(uri))
        })
    }

    /// Remove the node under the cursor with its whole subtree.
    ///
    /// The cursor moves to the right sibling, else the left sibling, else the parent.
    pub fn remove(&mut self) -> Result<()> {
        self.begin_modification()?;
        let node = self.current.clone();
        let parent = match node.node_type() {
            NodeType::DocumentRoot => return Err(UsageError::RemoveDocumentRoot.into()),
            NodeType::Deleted => return Err(invalid("remove", &node)),
            _ => node.parent.ok_or_else(|| orphan(&node))?,
        };

        let cursor = if let Some(links) = node.structure().cloned() {
            self.remove_descendants(&node)?;
            if let Some(left) = links.left_sibling {
                self.update(left, |left| {
                    if let Some(structure) = left.structure_mut() {
                        structure.right_sibling = links.right_sibling;
                    }
                })?;
            }
            if let Some(right) = links.right_sibling {
                self.update(right, |right| {
                    if let Some(structure) = right.structure_mut() {
                        structure.left_sibling = links.left_sibling;
                    }
                })?;
            }
            self.update(parent, |parent| {
                if let Some(structure) = parent.structure_mut() {
                    structure.child_count = structure.child_count.saturating_sub(1);
                    if links.left_sibling.is_none() {
                        structure.first_child = links.right_sibling;
                    }
                }
            })?;
            links.right_sibling.or(links.left_sibling).unwrap_or(parent)
        } else {
            let key = node.key;
            self.update(parent, |parent| {
                if let NodeKind::Element {
                    attributes,
                    namespaces,
                    ..
                } = &mut parent.kind
                {
                    attributes.retain(|k| *k != key);
                    namespaces.retain(|k| *k != key);
                }
            })?;
            parent
        };

        for key in node.attributes().iter().chain(node.namespaces()) {
            self.state.remove(*key)?;
        }
        self.state.remove(node.key)?;
        self.adapt_hashes(Some(parent), 0u64.wrapping_sub(node.hash))?;
        self.end_modification(cursor)
    }

    fn remove_descendants(&mut self, node: &Node) -> Result<()> {
        let mut stack: Vec<NodeKey> = node
            .structure()
            .and_then(|s| s.first_child)
            .into_iter()
            .collect();
        while let Some(key) = stack.pop() {
            let descendant = self.state.existing(key)?;
            if let Some(structure) = descendant.structure() {
                stack.extend(structure.right_sibling);
                stack.extend(structure.first_child);
            }
            for key in descendant.attributes().iter().chain(descendant.namespaces()) {
                self.state.remove(*key)?;
            }
            self.state.remove(key)?;
        }
        Ok(())
    }

    fn set_field(
        &mut self,
        operation: &'static str,
        set: impl FnOnce(&mut WriteState, &mut NodeKind) -> bool,
    ) -> Result<()> {
        self.begin_modification()?;
        let old = self.current.clone();
        let mut new = old.clone();
        if !set(&mut self.state, &mut new.kind) {
            return Err(invalid(operation, &old));
        }
        self.state.write(new.clone())?;
        self.adapt_hashes_for_update(old.key, &old, &new)?;
        self.end_modification(old.key)
    }

    /// Rename the element or attribute under the cursor, or change the prefix of a namespace.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.set_field("set name", |state, kind| match kind {
            NodeKind::Element { name: key, .. }
            | NodeKind::Attribute { name: key, .. }
            | NodeKind::Namespace { prefix: key, .. } => {
                *key = state.create_name(name);
                true
            }
            _ => false,
        })
    }

    pub fn set_uri(&mut self, uri: &str) -> Result<()> {
        self.set_field("set uri", |state, kind| match kind {
            NodeKind::Element { uri: key, .. }
            | NodeKind::Attribute { uri: key, .. }
            | NodeKind::Namespace { uri: key, .. } => {
                *key = state.create_name(uri);
                true
            }
            _ => false,
        })
    }

    /// Replace the value of the text or attribute node under the cursor.
    pub fn set_value(&mut self, value: &[u8]) -> Result<()> {
        self.set_field("set value", |_, kind| match kind {
            NodeKind::Text { value: old, .. } | NodeKind::Attribute { value: old, .. } => {
                *old = value.to_vec();
                true
            }
            _ => false,
        })
    }

    fn refresh_cursor(&mut self) -> Result<()> {
        let key = self.current.key;
        self.current = match self.state.node(key)? {
            Some(node) => node,
            None => self.state.existing(DOCUMENT_ROOT_KEY)?,
        };
        Ok(())
    }

    fn reset(&mut self, revision: Option<u64>) -> Result<()> {
        match self.session.shared().read_state(revision) {
            Ok(read) => {
                self.state.rebind(read);
                self.session
                    .shared()
                    .rebind(self.id, self.state.read.revision());
            }
            Err(e) => {
                self.state.discard();
                return Err(e);
            }
        }
        self.modifications = 0;
        self.last_commit = Instant::now();
        self.refresh_cursor()
    }

    /// Make every change since the last commit durable as a new revision, then continue on top
    /// of it.
    pub fn commit(&mut self) -> Result<()> {
        self.assert_open()?;
        let committed = self.session.shared().commit(self.id, &mut self.state)?;
        tracing::debug!(
            txn = self.id,
            revision = committed.uber.revision(),
            pages = committed.pages,
            modifications = self.modifications,
            "write transaction committed"
        );
        self.reset(None)?;
        match committed.late_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Discard every change since the last commit and continue on the newest revision.
    pub fn abort(&mut self) -> Result<()> {
        self.assert_open()?;
        tracing::debug!(txn = self.id, modifications = self.modifications, "aborting");
        self.reset(None)
    }

    /// Continue from the content of an older revision. The next commit creates a new revision
    /// derived from it; the revisions in between stay readable.
    pub fn revert_to(&mut self, revision: u64) -> Result<()> {
        self.assert_open()?;
        if self.modifications > 0 || self.state.has_changes() {
            return Err(UsageError::PendingModifications {
                id: self.id,
                modifications: self.modifications,
            }
            .into());
        }
        self.session.shared().check_revision(revision)?;
        self.reset(Some(revision))?;
        tracing::debug!(txn = self.id, revision, "reverted");
        Ok(())
    }

    /// Close the transaction. Fails while changes are uncommitted.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.modifications > 0 {
            return Err(UsageError::PendingModifications {
                id: self.id,
                modifications: self.modifications,
            }
            .into());
        }
        self.closed.store(true, Ordering::Release);
        self.session.shared().release(self.id);
        tracing::trace!(txn = self.id, "closed write transaction");
        Ok(())
    }

    /// The keys from the document root down to `key`.
    pub(crate) fn path_to(&mut self, key: NodeKey) -> Result<Vec<NodeKey>> {
        let mut path = vec![key];
        let mut next = self.state.existing(key)?.parent;
        while let Some(parent) = next {
            path.push(parent);
            next = self.state.existing(parent)?.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Whether the transaction holds changes which no commit has made durable yet.
    pub(crate) fn has_changes(&self) -> bool {
        self.state.has_changes()
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }
}

impl NodeReadTrx for WriteTransaction {
    fn transaction_id(&self) -> u64 {
        self.id
    }

    fn revision_number(&self) -> Result<u64> {
        self.assert_open()?;
        Ok(self.state.revision())
    }

    fn revision_timestamp(&self) -> Result<i64> {
        self.assert_open()?;
        Ok(self.state.read.root().timestamp)
    }

    fn max_node_key(&self) -> Result<u64> {
        self.assert_open()?;
        Ok(self.state.max_node_key)
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
        Ok(self.state.name(key))
    }

    fn key_for_name(&self, name: &str) -> Result<Option<NameKey>> {
        self.assert_open()?;
        Ok(self.state.key_for_name(name))
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.modifications > 0 {
            tracing::warn!(
                txn = self.id,
                modifications = self.modifications,
                "write transaction dropped with uncommitted modifications, aborting"
            );
        }
        self.state.discard();
        self.session.shared().release(self.id);
    }
}
