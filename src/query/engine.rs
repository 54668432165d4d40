//! Query execution over the catalog
//!
//! # Execution Flow
//!
//! 1. Copy the catalog's entries under the read lock
//! 2. Resolve candidates concurrently (cache hit or positional read),
//!    keeping catalog order and skipping documents that do not decode
//! 3. Keep the documents the filter matches
//! 4. Sort, then skip, limit and collapse to one
//!
//! Reads never wait on the commit pipeline. A query sees the catalog as
//! it was when the scan started.

use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use tracing::warn;

use super::filter::Filter;
use super::options::FetchOptions;
use super::result::FetchOutcome;
use super::sorter::DocumentSorter;
use crate::document::Document;
use crate::storage::{LogStore, Slot};
use crate::store::state::{Resolution, StoreState};
use crate::store::{StoreError, StoreResult};

/// Reads resolved at once during a scan.
pub const READ_CONCURRENCY: usize = 16;

/// Resolves `entries` to documents in the order given.
///
/// With `skip_over` set, a document that is not cached and whose stored
/// length is at least that many bytes yields `None` instead of a read.
/// A document that fails to decode also yields `None`; I/O failures end
/// the stream.
pub(crate) fn resolve_entries(
    state: Arc<StoreState>,
    log: Arc<LogStore>,
    entries: Vec<(String, Slot)>,
    skip_over: Option<usize>,
) -> impl Stream<Item = StoreResult<Option<(String, Document)>>> + Send + 'static {
    stream::iter(entries)
        .map(move |(key, slot)| {
            let state = Arc::clone(&state);
            let log = Arc::clone(&log);
            async move {
                match state.resolve_slot(&key, slot) {
                    Resolution::Resolved(doc) => Ok(Some((key, doc))),
                    Resolution::Deferred(slot)
                        if skip_over.map_or(false, |limit| slot.length as usize >= limit) =>
                    {
                        Ok(None)
                    }
                    Resolution::Deferred(slot) => {
                        match state.read_deferred(log, key.clone(), slot).await {
                            Ok(doc) => Ok(Some((key, doc))),
                            Err(e @ (StoreError::Decode { .. } | StoreError::Corrupt(_))) => {
                                warn!(key = %key, offset = slot.offset, error = %e, "skipping unreadable document");
                                Ok(None)
                            }
                            Err(e) => Err(e),
                        }
                    }
                }
            }
        })
        .buffered(READ_CONCURRENCY)
}

/// Answers fetches and counts.
pub(crate) struct QueryEngine {
    state: Arc<StoreState>,
    cache_limit: usize,
}

impl QueryEngine {
    pub fn new(state: Arc<StoreState>, cache_limit: usize) -> Self {
        Self { state, cache_limit }
    }

    /// Runs `filter` and shapes the matches by `options`.
    pub async fn fetch(&self, filter: &Filter, options: &FetchOptions) -> StoreResult<FetchOutcome> {
        self.state.metrics.increment_queries();
        let matched = self.matching(filter, options.shallow).await?;
        Ok(shape(matched, options))
    }

    /// Number of documents `filter` matches.
    pub async fn count(&self, filter: &Filter) -> StoreResult<usize> {
        self.state.metrics.increment_queries();
        if filter.is_match_all() {
            return Ok(self.state.view()?.catalog.len());
        }
        Ok(self.matching(filter, false).await?.len())
    }

    /// Every live document in catalog order.
    pub async fn documents(&self) -> StoreResult<Vec<Document>> {
        self.matching(&Filter::match_all(), false).await
    }

    async fn matching(&self, filter: &Filter, shallow: bool) -> StoreResult<Vec<Document>> {
        let (log, entries) = {
            let view = self.state.view()?;
            (Arc::clone(&view.log), view.catalog.entries())
        };
        let skip_over = shallow.then_some(self.cache_limit);

        resolve_entries(Arc::clone(&self.state), log, entries, skip_over)
            .try_filter_map(|resolved| {
                future::ready(Ok(resolved
                    .map(|(_, doc)| doc)
                    .filter(|doc| filter.matches(doc))))
            })
            .try_collect()
            .await
    }
}

/// Applies sort, count, skip, limit and one to matched documents.
pub fn shape(matched: Vec<Document>, options: &FetchOptions) -> FetchOutcome {
    let sorted = match &options.sort {
        Some(spec) => DocumentSorter::sort(matched, spec),
        None => matched,
    };
    if sorted.is_empty() {
        return FetchOutcome::NoRecords;
    }
    if options.count {
        return FetchOutcome::Count(sorted.len());
    }

    let take = options.limit.unwrap_or(usize::MAX);
    let mut page: Vec<Document> = sorted.into_iter().skip(options.skip).take(take).collect();
    if page.is_empty() {
        return FetchOutcome::NoRecords;
    }
    if options.one {
        return FetchOutcome::One(page.swap_remove(0));
    }
    FetchOutcome::Many(page)
}
