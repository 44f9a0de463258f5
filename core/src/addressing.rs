//! Addressing within the indirect trees.
//!
//! Two kinds of trees share this scheme: the tree of revision root pages hanging off the uber
//! page, keyed by revision number, and the tree of node pages hanging off every revision root
//! page, keyed by node page key. Both are radix trees of [`TREE_HEIGHT`] levels with
//! [`INDIRECT_FANOUT`] children per indirect page.
//!
//! A key is split into one offset per level, most significant first: at level `i` the offset is
//! `key >> LEVEL_EXPONENTS[i]`, after which those bits are subtracted from the key.

use arrayvec::ArrayVec;
use std::fmt;

/// log2 of the number of children of an indirect page.
pub const INDIRECT_FANOUT_EXPONENT: u32 = 7;

/// The number of children of an indirect page.
pub const INDIRECT_FANOUT: usize = 1 << INDIRECT_FANOUT_EXPONENT;

/// The shift applied to the key at each level of an indirect tree, root level first.
pub const LEVEL_EXPONENTS: [u32; 4] = [21, 14, 7, 0];

/// The number of indirect pages on the path from a tree root to a leaf reference.
pub const TREE_HEIGHT: usize = LEVEL_EXPONENTS.len();

/// The first key which can no longer be addressed by an indirect tree.
pub const MAX_KEY: u64 = 1 << (LEVEL_EXPONENTS[0] + INDIRECT_FANOUT_EXPONENT);

/// log2 of the number of node slots within a node page.
pub const NODE_COUNT_EXPONENT: u32 = 7;

/// The number of node slots within a node page.
pub const NODES_PER_PAGE: usize = 1 << NODE_COUNT_EXPONENT;

/// The per-level child offsets of a key.
pub type LevelOffsets = ArrayVec<usize, TREE_HEIGHT>;

/// A key too large to be addressed by an indirect tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOutOfRange(pub u64);

impl fmt::Display for KeyOutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key {} exceeds the addressable range {}", self.0, MAX_KEY)
    }
}

impl std::error::Error for KeyOutOfRange {}

/// Split a key into the child offset to follow at every level of an indirect tree.
pub fn level_offsets(key: u64) -> Result<LevelOffsets, KeyOutOfRange> {
    if key >= MAX_KEY {
        return Err(KeyOutOfRange(key));
    }

    let mut remaining = key;
    let mut offsets = LevelOffsets::new();
    for exp in LEVEL_EXPONENTS {
        let offset = remaining >> exp;
        remaining -= offset << exp;
        offsets.push(offset as usize);
    }
    Ok(offsets)
}

/// The key of the node page holding the given node.
pub fn node_page_key(node_key: u64) -> u64 {
    node_key >> NODE_COUNT_EXPONENT
}

/// The slot of the given node within its node page.
pub fn node_page_offset(node_key: u64) -> usize {
    (node_key - (node_page_key(node_key) << NODE_COUNT_EXPONENT)) as usize
}

/// The node key stored at `offset` of the node page `page_key`.
pub fn node_key(page_key: u64, offset: usize) -> u64 {
    (page_key << NODE_COUNT_EXPONENT) + offset as u64
}
