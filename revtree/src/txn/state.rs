//! Read-side transaction state: resolving revision roots and reconstructing node pages.

use std::{num::NonZeroUsize, sync::Arc};

use fxhash::FxHashSet;
use lru::LruCache;
use revtree_core::{
    addressing::node_page_offset,
    page::{dereference_leaf, PageReference},
    NameKey, NamePage, Node, NodeKey, NodePage, NodePageContainer, Page, PageKey, PageKind,
    RevisionRootPage, Revisioning, TreeError, UberPage,
};

use crate::{
    io::Reader,
    metrics::{Metric, Metrics},
    page_cache::PageCache,
    ConsistencyError, Result,
};

/// Everything a transaction state shares with its session.
#[derive(Clone)]
pub(crate) struct Context {
    pub revisioning: Revisioning,
    pub milestone: u32,
    pub cache: Arc<PageCache>,
    pub metrics: Metrics,
    pub indirect_cache_pages: NonZeroUsize,
}

/// Reads pages through a [`Reader`], keeping recently used indirect and root pages in memory.
///
/// Node pages are not kept here: reconstructed node pages live in the [`PageCache`].
pub(crate) struct PageLoader {
    reader: Box<dyn Reader>,
    pages: LruCache<PageKey, Arc<Page>>,
}

impl PageLoader {
    pub fn new(reader: Box<dyn Reader>, capacity: NonZeroUsize) -> Self {
        PageLoader {
            reader,
            pages: LruCache::new(capacity),
        }
    }

    pub fn load(&mut self, key: PageKey, checksum: u64) -> Result<Arc<Page>> {
        if let Some(page) = self.pages.get(&key) {
            return Ok(page.clone());
        }
        let page = Arc::new(self.reader.read(key, checksum)?);
        if page.kind() != PageKind::Node {
            self.pages.put(key, page.clone());
        }
        Ok(page)
    }

    /// The page behind a reference which is known to be present.
    pub fn resolve(&mut self, reference: &PageReference) -> Result<Arc<Page>> {
        match (reference.page(), reference.key()) {
            (Some(page), _) => Ok(page.clone()),
            (None, Some(key)) => self.load(key, reference.checksum()),
            (None, None) => Err(ConsistencyError::MalformedTree(
                "dereferenced an absent page".to_string(),
            )
            .into()),
        }
    }
}

fn unexpected(expected: PageKind, found: &Page) -> crate::Error {
    TreeError::UnexpectedPage {
        expected,
        found: found.kind(),
    }
    .into()
}

/// The state of a transaction bound to one committed revision.
pub(crate) struct ReadState {
    ctx: Context,
    loader: PageLoader,
    uber: Arc<UberPage>,
    root: Arc<RevisionRootPage>,
    names: Arc<NamePage>,
}

impl ReadState {
    /// Bind to `revision`, which must be reachable from `uber`.
    pub fn open(
        ctx: Context,
        reader: Box<dyn Reader>,
        uber: Arc<UberPage>,
        revision: u64,
    ) -> Result<Self> {
        let loader = PageLoader::new(reader, ctx.indirect_cache_pages);
        let mut state = ReadState {
            ctx,
            loader,
            uber,
            root: Arc::new(RevisionRootPage {
                revision,
                previous_revision: None,
                timestamp: 0,
                max_node_key: 0,
                node_indirect: PageReference::default(),
                name_page: PageReference::default(),
            }),
            names: Arc::new(NamePage::default()),
        };
        let root = state.revision_root(revision)?;
        state.names = state.load_names(&root)?;
        state.root = root;
        Ok(state)
    }

    pub fn loader_mut(&mut self) -> &mut PageLoader {
        &mut self.loader
    }

    pub fn uber(&self) -> &Arc<UberPage> {
        &self.uber
    }

    pub fn root(&self) -> &RevisionRootPage {
        &self.root
    }

    pub fn revision(&self) -> u64 {
        self.root.revision
    }

    pub fn names(&self) -> &NamePage {
        &self.names
    }

    pub fn name(&self, key: NameKey) -> Option<&str> {
        self.names.get(key)
    }

    /// Locate the root page of any revision reachable from the bound uber page.
    pub fn revision_root(&mut self, revision: u64) -> Result<Arc<RevisionRootPage>> {
        if revision > self.uber.revision() {
            return Err(ConsistencyError::MissingRevision(revision).into());
        }
        let loader = &mut self.loader;
        let leaf = dereference_leaf(&self.uber.indirect, revision, |key, checksum| {
            loader.load(key, checksum)
        })?
        .ok_or(ConsistencyError::MissingRevision(revision))?;

        match &*self.loader.resolve(&leaf)? {
            Page::RevisionRoot(root) => Ok(Arc::new(root.clone())),
            other => Err(unexpected(PageKind::RevisionRoot, other)),
        }
    }

    fn load_names(&mut self, root: &RevisionRootPage) -> Result<Arc<NamePage>> {
        if root.name_page.is_absent() {
            return Ok(Arc::new(NamePage::default()));
        }
        match &*self.loader.resolve(&root.name_page)? {
            Page::Name(names) => Ok(Arc::new(names.clone())),
            other => Err(unexpected(PageKind::Name, other)),
        }
    }

    /// The stored versions of a node page, newest first, as visible from the bound revision.
    ///
    /// Walks the revision ancestry and collects each distinct version until the revisioning
    /// strategy has enough of them or the page's history ends.
    pub fn snapshot_pages(&mut self, page_key: u64) -> Result<Vec<Arc<NodePage>>> {
        let wanted = self
            .ctx
            .revisioning
            .versions_to_scan(self.ctx.milestone);
        let mut pages: Vec<Arc<NodePage>> = Vec::with_capacity(wanted);
        let mut seen = FxHashSet::default();
        let mut root = self.root.clone();

        loop {
            let loader = &mut self.loader;
            let leaf = dereference_leaf(&root.node_indirect, page_key, |key, checksum| {
                loader.load(key, checksum)
            })?;
            let Some(leaf) = leaf else { break };

            if leaf.key().map_or(true, |key| seen.insert(key)) {
                let page = match &*self.loader.resolve(&leaf)? {
                    Page::Node(page) => Arc::new(page.clone()),
                    other => return Err(unexpected(PageKind::Node, other)),
                };
                let first_version = page.version() == 0;
                pages.push(page);
                if first_version || pages.len() == wanted {
                    break;
                }
            }

            root = match root.previous_revision {
                Some(previous) => self.revision_root(previous)?,
                None => break,
            };
        }

        self.ctx
            .metrics
            .count_n(Metric::SnapshotPagesScanned, pages.len() as u64);
        Ok(pages)
    }

    /// The node page at `page_key` as of the bound revision, or `None` if it was never written.
    pub fn node_page(&mut self, page_key: u64) -> Result<Option<Arc<NodePage>>> {
        self.ctx.metrics.count(Metric::PageRequests);
        let revision = self.revision();
        if let Some(page) = self.ctx.cache.get(revision, page_key) {
            return Ok(Some(page));
        }

        self.ctx.metrics.count(Metric::PageCacheMisses);
        let metrics = self.ctx.metrics.clone();
        let _timer = metrics.record(Metric::PageFetchTime);
        let pages = self.snapshot_pages(page_key)?;
        if pages.is_empty() {
            return Ok(None);
        }
        let page = Arc::new(
            self.ctx
                .revisioning
                .combine(&pages, self.ctx.milestone),
        );
        tracing::debug!(revision, page_key, versions = pages.len(), "reconstructed node page");
        self.ctx.cache.put(revision, page_key, page.clone());
        Ok(Some(page))
    }

    /// The live node at `key`. Tombstones and never written slots read as `None`.
    pub fn node(&mut self, key: NodeKey) -> Result<Option<Node>> {
        if key > self.root.max_node_key {
            return Ok(None);
        }
        let page = self.node_page(revtree_core::node_page_key(key))?;
        Ok(page.and_then(|page| {
            page.get(node_page_offset(key))
                .filter(|node| !node.is_deleted())
                .cloned()
        }))
    }

    /// The working container for the next version of a node page.
    pub fn container_for_modification(&mut self, page_key: u64) -> Result<NodePageContainer> {
        let pages = self.snapshot_pages(page_key)?;
        if pages.is_empty() {
            return Ok(NodePageContainer::fresh(page_key));
        }
        Ok(self
            .ctx
            .revisioning
            .combine_for_modification(&pages, self.ctx.milestone))
    }
}
