//! Reconstruction of node pages from their stored versions.
//!
//! A node page key is written at most once per revision. What a version holds depends on the
//! [`Revisioning`] strategy: some versions are full dumps of the page, others are deltas against
//! older versions. The milestone bounds how many versions must be read to rebuild a page.
//!
//! Every function in this module takes the versions of one page key ordered from newest to
//! oldest, as collected by walking the revision history backwards.

use std::borrow::Borrow;

use crate::page::NodePage;

/// How node page versions are stored and combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum Revisioning {
    /// Every version is a full dump.
    FullDump,
    /// Every version holds all slots changed since the last full dump. Every `milestone`-th
    /// version is a full dump.
    Differential,
    /// Every version holds the slots written in its revision. Every `milestone`-th version is a
    /// full dump.
    Incremental,
    /// Every version holds the slots written in its revision, plus the slots which would
    /// otherwise fall out of the window of the last `milestone` versions.
    SlidingSnapshot,
}

impl Revisioning {
    pub const ALL: [Revisioning; 4] = [
        Revisioning::FullDump,
        Revisioning::Differential,
        Revisioning::Incremental,
        Revisioning::SlidingSnapshot,
    ];

    /// The maximum number of versions that must be read to reconstruct a page.
    pub fn versions_to_scan(self, milestone: u32) -> usize {
        match self {
            Revisioning::FullDump => 1,
            _ => milestone.max(1) as usize,
        }
    }

    /// Combine the versions of a page into the page as seen by readers.
    ///
    /// Panics if `pages` is empty.
    pub fn combine<P: Borrow<NodePage>>(self, pages: &[P], milestone: u32) -> NodePage {
        let pages: Vec<&NodePage> = pages.iter().map(as_page).collect();
        let milestone = u64::from(milestone.max(1));
        let latest = pages[0];
        match self {
            Revisioning::FullDump => latest.clone(),
            Revisioning::Differential => {
                let mut page = latest.clone();
                if latest.version() % milestone != 0 {
                    let dump = pages[1..].iter().find(|p| p.version() % milestone == 0);
                    if let Some(dump) = dump {
                        fill_missing(&mut page, dump);
                    }
                }
                page
            }
            Revisioning::Incremental => {
                let mut page = NodePage::new(latest.page_key(), latest.version());
                for older in pages {
                    fill_missing(&mut page, older);
                    if older.version() % milestone == 0 {
                        break;
                    }
                }
                page
            }
            Revisioning::SlidingSnapshot => {
                let mut page = NodePage::new(latest.page_key(), latest.version());
                for older in pages {
                    fill_missing(&mut page, older);
                }
                page
            }
        }
    }

    /// Combine the versions of a page into a container for the next version.
    ///
    /// The complete page is what [`Revisioning::combine`] returns. The modified page is the next
    /// version, pre-filled with whatever the strategy requires it to carry besides the slots
    /// written in the new revision.
    ///
    /// Panics if `pages` is empty.
    pub fn combine_for_modification<P: Borrow<NodePage>>(
        self,
        pages: &[P],
        milestone: u32,
    ) -> NodePageContainer {
        let complete = self.combine(pages, milestone);
        let pages: Vec<&NodePage> = pages.iter().map(as_page).collect();
        let milestone = u64::from(milestone.max(1));
        let latest = pages[0];
        let version = latest.version() + 1;
        let mut modified = NodePage::new(latest.page_key(), version);

        match self {
            Revisioning::FullDump => fill_missing(&mut modified, &complete),
            Revisioning::Incremental => {
                if version % milestone == 0 {
                    fill_missing(&mut modified, &complete);
                }
            }
            Revisioning::Differential => {
                if version % milestone == 0 {
                    fill_missing(&mut modified, &complete);
                } else if latest.version() % milestone != 0 {
                    fill_missing(&mut modified, latest);
                }
            }
            Revisioning::SlidingSnapshot => {
                if pages.len() as u64 >= milestone {
                    if let Some((oldest, newer)) = pages[..milestone as usize].split_last() {
                        for (offset, node) in oldest.nodes() {
                            if !newer.iter().any(|p| p.is_set(offset)) {
                                modified.set(offset, node.clone());
                            }
                        }
                    }
                }
            }
        }

        NodePageContainer { complete, modified }
    }
}

fn as_page<P: Borrow<NodePage>>(page: &P) -> &NodePage {
    page.borrow()
}

fn fill_missing(page: &mut NodePage, older: &NodePage) {
    for (offset, node) in older.nodes() {
        if !page.is_set(offset) {
            page.set(offset, node.clone());
        }
    }
}

/// The working state of a node page within a write transaction.
///
/// `complete` is the page as of the transaction's base revision, used for reads. `modified` is
/// the next version of the page: the slots written by the transaction plus whatever the
/// revisioning strategy carries over. Reads consult `modified` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePageContainer {
    complete: NodePage,
    modified: NodePage,
}

impl NodePageContainer {
    /// The container of a page key which has never been written.
    pub fn fresh(page_key: u64) -> Self {
        NodePageContainer {
            complete: NodePage::new(page_key, 0),
            modified: NodePage::new(page_key, 0),
        }
    }

    pub fn page_key(&self) -> u64 {
        self.modified.page_key()
    }

    pub fn complete(&self) -> &NodePage {
        &self.complete
    }

    pub fn modified(&self) -> &NodePage {
        &self.modified
    }

    pub fn complete_mut(&mut self) -> &mut NodePage {
        &mut self.complete
    }

    pub fn modified_mut(&mut self) -> &mut NodePage {
        &mut self.modified
    }

    /// The node at `offset` as seen by the owning transaction.
    pub fn get(&self, offset: usize) -> Option<&crate::node::Node> {
        self.modified.get(offset).or_else(|| self.complete.get(offset))
    }

    pub fn into_modified(self) -> NodePage {
        self.modified
    }
}
