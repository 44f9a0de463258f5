//! The session-wide cache of reconstructed node pages.
//!
//! Entries are keyed by revision and node page key: a reconstruction is only valid for the
//! revision it was made at. The cache has no size bound. Entries of a revision are dropped once
//! no open transaction reads that revision, and the whole cache is dropped when the session
//! closes.

use std::sync::Arc;

use dashmap::DashMap;
use fxhash::FxBuildHasher;
use revtree_core::NodePage;

#[derive(Default)]
pub struct PageCache {
    pages: DashMap<(u64, u64), Arc<NodePage>, FxBuildHasher>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, revision: u64, page_key: u64) -> Option<Arc<NodePage>> {
        self.pages
            .get(&(revision, page_key))
            .map(|entry| entry.value().clone())
    }

    pub fn put(&self, revision: u64, page_key: u64, page: Arc<NodePage>) {
        self.pages.insert((revision, page_key), page);
    }

    /// Drop every entry of the given revision.
    pub fn clear_revision(&self, revision: u64) {
        self.pages.retain(|(rev, _), _| *rev != revision);
    }

    pub fn clear(&self) {
        self.pages.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
