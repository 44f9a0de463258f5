use std::collections::BTreeMap;

use fxhash::FxHashMap;
use parking_lot::{Mutex, MutexGuard};
use revtree_core::{NameKey, Node, NodeKey, NodePageContainer};

/// A node page touched by a write transaction.
pub(crate) struct LogEntry {
    pub container: NodePageContainer,
    /// Every slot written by the transaction, with the record it held before the first write.
    originals: BTreeMap<usize, Option<Node>>,
}

impl LogEntry {
    pub fn new(container: NodePageContainer) -> Self {
        LogEntry {
            container,
            originals: BTreeMap::new(),
        }
    }

    pub fn write(&mut self, offset: usize, node: Node) {
        let container = &self.container;
        self.originals
            .entry(offset)
            .or_insert_with(|| container.get(offset).cloned());
        self.container.modified_mut().set(offset, node);
    }

    /// Replace the node with a tombstone in both the next version and the transaction's view.
    pub fn remove(&mut self, offset: usize, key: NodeKey) {
        self.write(offset, Node::deleted(key));
        self.container.complete_mut().set(offset, Node::deleted(key));
    }

    pub fn originals(&self) -> impl Iterator<Item = (usize, Option<&Node>)> {
        self.originals.iter().map(|(offset, node)| (*offset, node.as_ref()))
    }
}

/// The node pages touched by one write transaction, keyed by node page key.
///
/// Shared with the session so that commits of other transactions can push their records into
/// the pages this transaction already loaded.
#[derive(Default)]
pub(crate) struct TransactionLog {
    entries: Mutex<FxHashMap<u64, LogEntry>>,
    /// Names bound by transactions which committed after this one was bound.
    committed_names: Mutex<BTreeMap<NameKey, String>>,
    #[cfg(test)]
    pub(crate) fail_absorb: std::sync::atomic::AtomicBool,
}

impl TransactionLog {
    pub fn lock(&self) -> MutexGuard<'_, FxHashMap<u64, LogEntry>> {
        self.entries.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry and every absorbed name.
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.committed_names.lock().clear();
    }

    /// Overlay records committed by another transaction onto this transaction's view of the
    /// page, if it holds one.
    pub fn absorb(&self, page_key: u64, committed: &[(usize, Node)]) {
        #[cfg(test)]
        if self.fail_absorb.load(std::sync::atomic::Ordering::Relaxed) {
            panic!("absorb of page {page_key} failed");
        }
        if let Some(entry) = self.entries.lock().get_mut(&page_key) {
            for (offset, node) in committed {
                entry.container.complete_mut().set(*offset, node.clone());
            }
        }
    }

    pub fn absorb_names(&self, names: &[(NameKey, String)]) {
        let mut committed = self.committed_names.lock();
        for (key, name) in names {
            committed.entry(*key).or_insert_with(|| name.clone());
        }
    }

    pub fn committed_name(&self, key: NameKey) -> Option<String> {
        self.committed_names.lock().get(&key).cloned()
    }
}

/// Three-way merge of one record during a rebased commit.
///
/// `base` is the record the transaction started from, `head` the record of the newest committed
/// revision and `ours` the record the transaction wrote. Subtree hashes are additive, so the
/// hash change made by the transaction is applied on top of the committed hash.
pub(crate) fn merge(base: Option<&Node>, head: Option<&Node>, ours: &Node) -> Node {
    match (base, head) {
        (base, head) if base == head => ours.clone(),
        (Some(base), Some(head)) if !head.is_deleted() && !ours.is_deleted() => {
            let mut merged = if same_except_hash(base, ours) {
                head.clone()
            } else {
                ours.clone()
            };
            merged.hash = head.hash.wrapping_add(ours.hash.wrapping_sub(base.hash));
            merged
        }
        _ => ours.clone(),
    }
}

fn same_except_hash(a: &Node, b: &Node) -> bool {
    a.key == b.key && a.parent == b.parent && a.kind == b.kind
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_remembers_first_original() {
        let mut container = NodePageContainer::fresh(0);
        container.complete_mut().set(1, Node::text(1, 0, b"old".to_vec()));
        let mut entry = LogEntry::new(container);

        entry.write(1, Node::text(1, 0, b"new".to_vec()));
        entry.write(1, Node::text(1, 0, b"newer".to_vec()));
        entry.write(2, Node::text(2, 0, b"fresh".to_vec()));

        let originals: Vec<_> = entry.originals().collect();
        assert_eq!(originals.len(), 2);
        assert_eq!(originals[0].1.and_then(Node::value), Some(&b"old"[..]));
        assert_eq!(originals[1].1, None);
        assert_eq!(entry.container.get(1).and_then(Node::value), Some(&b"newer"[..]));
    }

    #[test]
    fn merge_adds_hash_deltas() {
        let mut base = Node::element(3, 0, 1, 2);
        base.hash = 100;
        let mut head = base.clone();
        head.hash = 130;
        let mut ours = base.clone();
        ours.hash = 107;

        let merged = merge(Some(&base), Some(&head), &ours);
        assert_eq!(merged.hash, 137);
        assert_eq!(merged.kind, head.kind);
    }

    #[test]
    fn merge_keeps_our_structure() {
        let base = Node::element(3, 0, 1, 2);
        let mut head = base.clone();
        head.hash = 5;
        let mut ours = base.clone();
        ours.structure_mut().unwrap().child_count = 1;

        let merged = merge(Some(&base), Some(&head), &ours);
        assert_eq!(merged.structure().unwrap().child_count, 1);
        assert_eq!(merged.hash, 5);
    }

    #[test]
    fn unchanged_head_takes_ours() {
        let base = Node::text(4, 0, b"a".to_vec());
        let ours = Node::deleted(4);
        assert_eq!(merge(Some(&base), Some(&base), &ours), ours);
        assert_eq!(merge(None, None, &base), base);
    }
}
