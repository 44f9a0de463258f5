//! Turning a write transaction's log into a durable revision.

use std::sync::Arc;

use revtree_core::{
    page::prepare_leaf, NameKey, Node, NodePage, NodePageContainer, Page, PageReference, RevisionRootPage,
    UberPage,
};

use super::Shared;
use crate::{
    io,
    metrics::Metric,
    store::RevisionInfo,
    task::TaskGroup,
    txn::{
        log::{merge, LogEntry},
        state::ReadState,
        write_state::WriteState,
    },
    ConcurrencyError, Result, UsageError,
};

/// What a commit produced.
pub(crate) struct Committed {
    pub uber: Arc<UberPage>,
    pub pages: usize,
    /// A failure after the revision became durable and visible.
    pub late_error: Option<crate::Error>,
}

impl Shared {
    /// Write the changes of `state` as the next revision and publish it.
    ///
    /// If another transaction committed since `state` was bound, the changes are rebased onto
    /// the newest revision first. An error leaves the state with its changes. Failures after the
    /// revision is durable are reported through [`Committed::late_error`] instead.
    pub(crate) fn commit(&self, txn: u64, state: &mut WriteState) -> Result<Committed> {
        let _commit = self.commit_lock.lock();
        if self.is_closed() {
            return Err(UsageError::SessionClosed.into());
        }
        let metrics = self.ctx.metrics.clone();
        let _timer = metrics.record(Metric::CommitTime);

        let head = self.head();
        let rebase = head.revision() != state.head().revision();
        let revision = head.revision() + 1;
        let mut head_state = if rebase {
            Some(ReadState::open(
                self.ctx.clone(),
                self.store.factory().reader()?,
                head.clone(),
                head.revision(),
            )?)
        } else {
            None
        };

        let template = match &head_state {
            Some(head_state) => head_state.root().clone(),
            None => state.read.root().clone(),
        };
        let mut root = RevisionRootPage::derive(&template, revision);
        root.timestamp = crate::now_millis();
        root.max_node_key = template.max_node_key.max(state.max_node_key);

        if !state.names.is_empty() {
            let mut names = match &head_state {
                Some(head_state) => head_state.names().clone(),
                None => state.read.names().clone(),
            };
            for (key, name) in &state.names {
                match names.get(*key) {
                    Some(bound) if bound != name => {
                        return Err(ConcurrencyError::NameCollision(*key).into())
                    }
                    Some(_) => {}
                    None => names.insert(*key, name.clone()),
                }
            }
            root.name_page = PageReference::dirty(Page::Name(names));
        }

        let bound_names: Vec<(NameKey, String)> = state
            .names
            .iter()
            .map(|(key, name)| (*key, name.clone()))
            .collect();

        let log = state.log.clone();
        let entries = log.lock();
        let mut page_keys: Vec<u64> = entries.keys().copied().collect();
        page_keys.sort_unstable();

        let mut propagate = Vec::with_capacity(page_keys.len());
        let mut published = Vec::with_capacity(page_keys.len());

        for page_key in page_keys {
            let Some(entry) = entries.get(&page_key) else {
                continue;
            };
            let container = match head_state.as_mut() {
                Some(head_state) => rebase_entry(head_state, page_key, entry)?,
                None => entry.container.clone(),
            };

            let committed: Arc<Vec<_>> = Arc::new(
                entry
                    .originals()
                    .filter_map(|(offset, _)| {
                        container
                            .modified()
                            .get(offset)
                            .map(|node| (offset, node.clone()))
                    })
                    .collect(),
            );
            propagate.push((page_key, committed));

            let loader = state.read.loader_mut();
            let leaf = prepare_leaf(&mut root.node_indirect, page_key, |key, checksum| {
                loader.load(key, checksum)
            })?;
            *leaf = PageReference::dirty(Page::Node(container.modified().clone()));
            published.push((page_key, reader_view(&container)));
        }

        let timestamp = root.timestamp;
        let mut uber = head.next();
        let loader = state.read.loader_mut();
        let leaf = prepare_leaf(&mut uber.indirect, revision, |key, checksum| {
            loader.load(key, checksum)
        })?;
        *leaf = PageReference::dirty(Page::RevisionRoot(root));

        let pages = io::write_tree(&mut *state.writer, &mut uber.indirect)?;
        let beacon = state.writer.write_first_reference(&uber)?;
        drop(entries);

        let uber = Arc::new(uber);
        *self.head.write() = uber.clone();
        for (page_key, page) in published {
            self.ctx.cache.put(revision, page_key, Arc::new(page));
        }
        metrics.count(Metric::Commits);
        tracing::info!(revision, pages, rebased = rebase, txn, "committed revision");

        let late_error = self
            .store
            .record_revision(&RevisionInfo {
                revision,
                timestamp,
                beacon,
            })
            .and_then(|()| self.propagate(txn, propagate, &bound_names))
            .err();
        Ok(Committed {
            uber,
            pages,
            late_error,
        })
    }

    /// Push the committed records of every page into the other open write transactions which
    /// hold the same page, and wait for all of them. The names bound by the commit go to every
    /// other write transaction.
    fn propagate(
        &self,
        txn: u64,
        pages: Vec<(u64, Arc<Vec<(usize, Node)>>)>,
        names: &[(NameKey, String)],
    ) -> Result<()> {
        let others = self.other_logs(txn);
        if others.is_empty() {
            return Ok(());
        }
        if !names.is_empty() {
            for (_, other_log) in &others {
                other_log.absorb_names(names);
            }
        }
        let pool = self.sync_pool.lock().clone();
        let mut tasks = TaskGroup::new();
        let mut targets = Vec::with_capacity(pages.len() * others.len());
        for (page_key, committed) in pages {
            for (other_txn, other_log) in &others {
                let other_log = other_log.clone();
                let committed = committed.clone();
                tasks.spawn(&pool, move || other_log.absorb(page_key, &committed));
                targets.push((page_key, *other_txn));
            }
        }

        for ((page_key, other_txn), res) in targets.into_iter().zip(tasks.join()) {
            if res.is_err() {
                tracing::error!(page_key, txn = other_txn, "propagation of committed page failed");
                return Err(ConcurrencyError::Propagation {
                    page_key,
                    txn: other_txn,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Rebuild the container of a page against the newest revision and merge the transaction's
/// records into it.
fn rebase_entry(
    head_state: &mut ReadState,
    page_key: u64,
    entry: &LogEntry,
) -> Result<NodePageContainer> {
    let mut container = head_state.container_for_modification(page_key)?;
    for (offset, original) in entry.originals() {
        let Some(ours) = entry.container.modified().get(offset) else {
            continue;
        };
        let merged = merge(original, container.complete().get(offset), ours);
        container.modified_mut().set(offset, merged.clone());
        container.complete_mut().set(offset, merged);
    }
    Ok(container)
}

/// The page as readers of the new revision see it.
fn reader_view(container: &NodePageContainer) -> NodePage {
    let mut page = container.modified().clone();
    for (offset, node) in container.complete().nodes() {
        if !page.is_set(offset) {
            page.set(offset, node.clone());
        }
    }
    page
}
