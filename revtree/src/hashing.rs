//! Subtree hashes.
//!
//! With hashing enabled every node satisfies
//!
//! ```text
//! hash(n) = content(n) + PRIME * (sum of hash(c) over children, attributes and namespaces of n)
//! ```
//!
//! in wrapping `u64` arithmetic. [`HashKind::Rolling`] maintains this incrementally by pushing the
//! change of one node up the ancestor path. [`HashKind::Postorder`] recomputes every ancestor from
//! its children. Both produce the same hashes.

use revtree_core::{Node, NodeKind, NodeType};
use serde::{Deserialize, Serialize};

pub const PRIME: u64 = 77081;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashKind {
    Rolling,
    Postorder,
    None,
}

/// The hash of a node's own content, ignoring its links and descendants.
///
/// The document root and tombstones have no content and hash to zero.
pub fn content_hash(node: &Node) -> u64 {
    let mut buf = Vec::with_capacity(16);
    buf.push(match node.node_type() {
        NodeType::DocumentRoot | NodeType::Deleted => return 0,
        NodeType::Element => 1u8,
        NodeType::Text => 2,
        NodeType::Attribute => 3,
        NodeType::Namespace => 4,
    });
    match &node.kind {
        NodeKind::Element { name, uri, .. } | NodeKind::Attribute { name, uri, .. } => {
            buf.extend_from_slice(&name.to_le_bytes());
            buf.extend_from_slice(&uri.to_le_bytes());
        }
        NodeKind::Namespace { prefix, uri } => {
            buf.extend_from_slice(&prefix.to_le_bytes());
            buf.extend_from_slice(&uri.to_le_bytes());
        }
        _ => {}
    }
    if let Some(value) = node.value() {
        buf.extend_from_slice(value);
    }
    twox_hash::XxHash64::oneshot(0, &buf)
}

/// Fold the hashes of a node's children into its content hash.
pub fn combine(content: u64, children: impl IntoIterator<Item = u64>) -> u64 {
    let sum = children
        .into_iter()
        .fold(0u64, |acc, h| acc.wrapping_add(h));
    content.wrapping_add(sum.wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_ignores_links() {
        let mut a = Node::element(5, 0, 1, 2);
        let b = Node::element(9, 3, 1, 2);
        a.structure_mut().unwrap().child_count = 4;
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&Node::element(5, 0, 1, 3)));
    }

    #[test]
    fn empty_document_hashes_to_zero() {
        assert_eq!(content_hash(&Node::document_root()), 0);
    }

    #[test]
    fn combine_is_order_independent() {
        assert_eq!(combine(7, [1, 2, 3]), combine(7, [3, 1, 2]));
        assert_eq!(combine(7, []), 7);
    }

    quickcheck::quickcheck! {
        fn dropping_a_child_subtracts_its_share(content: u64, children: Vec<u64>, extra: u64) -> bool {
            let with = combine(content, children.iter().copied().chain([extra]));
            let without = combine(content, children.iter().copied());
            with.wrapping_sub(without) == extra.wrapping_mul(PRIME)
        }
    }
}
