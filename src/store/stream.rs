//! Read streams over the catalog

use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use super::errors::StoreResult;
use super::state::StoreState;
use crate::document::Document;
use crate::query::resolve_entries;

/// Bounds and shape of a read stream.
///
/// `start` and `end` are inclusive key bounds. `prefix` further restricts
/// the stream to keys that start with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    pub start: Option<String>,
    pub end: Option<String>,
    pub prefix: Option<String>,
    /// Descending key order
    pub reverse: bool,
    pub limit: Option<usize>,
    /// Yield keys without reading documents
    pub keys_only: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, key: impl Into<String>) -> Self {
        self.start = Some(key.into());
        self
    }

    pub fn end(mut self, key: impl Into<String>) -> Self {
        self.end = Some(key.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

/// One item of a read stream. `doc` is `None` for key-only streams.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub key: String,
    pub doc: Option<Document>,
}

/// Stream of catalog entries.
pub type DocumentStream = BoxStream<'static, StoreResult<StreamEntry>>;

/// Builds a stream over the catalog as it is now.
pub(crate) fn read_stream(state: &Arc<StoreState>, options: &ReadOptions) -> StoreResult<DocumentStream> {
    let (log, mut entries) = {
        let view = state.view()?;
        let entries = view
            .catalog
            .range(options.start.as_deref(), options.end.as_deref());
        (Arc::clone(&view.log), entries)
    };

    if let Some(prefix) = &options.prefix {
        entries.retain(|(key, _)| key.starts_with(prefix.as_str()));
    }
    if options.reverse {
        entries.reverse();
    }
    if let Some(limit) = options.limit {
        entries.truncate(limit);
    }

    if options.keys_only {
        let keys = entries
            .into_iter()
            .map(|(key, _)| Ok(StreamEntry { key, doc: None }));
        return Ok(stream::iter(keys).boxed());
    }

    Ok(resolve_entries(Arc::clone(state), log, entries, None)
        .try_filter_map(|resolved| {
            future::ready(Ok(
                resolved.map(|(key, doc)| StreamEntry { key, doc: Some(doc) })
            ))
        })
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachePolicy, PropertyCache};
    use crate::index::IndexCatalog;
    use crate::observability::EventBus;
    use crate::storage::{LogStore, Slot};
    use tempfile::TempDir;

    fn state(dir: &TempDir) -> Arc<StoreState> {
        let path = dir.path().join("s.jot");
        std::fs::write(&path, b"a\t{}\nb1\t{}\nb2\t{}\nc\t{}\n").unwrap();
        let log = Arc::new(LogStore::open(&path).unwrap());
        let catalog = IndexCatalog::from_entries(vec![
            ("a".to_string(), Slot::new(2, 2)),
            ("b1".to_string(), Slot::new(8, 2)),
            ("b2".to_string(), Slot::new(14, 2)),
            ("c".to_string(), Slot::new(19, 2)),
        ]);
        let state = StoreState::new(
            Arc::clone(&log),
            PropertyCache::new(CachePolicy::Fifo, 1024, 16),
            EventBus::new(4),
        );
        state.install(log, catalog).unwrap();
        Arc::new(state)
    }

    async fn keys(state: &Arc<StoreState>, options: ReadOptions) -> Vec<String> {
        read_stream(state, &options)
            .unwrap()
            .map_ok(|entry| entry.key)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bounds_reverse_limit() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        assert_eq!(keys(&state, ReadOptions::new()).await, vec!["a", "b1", "b2", "c"]);
        assert_eq!(
            keys(&state, ReadOptions::new().start("b").end("b9")).await,
            vec!["b1", "b2"]
        );
        assert_eq!(
            keys(&state, ReadOptions::new().reverse().limit(2)).await,
            vec!["c", "b2"]
        );
        assert_eq!(keys(&state, ReadOptions::new().prefix("b")).await, vec!["b1", "b2"]);
    }

    #[tokio::test]
    async fn test_documents_carry_keys() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let entries: Vec<StreamEntry> = read_stream(&state, &ReadOptions::new().start("c"))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        let doc = entries[0].doc.as_ref().unwrap();
        assert_eq!(doc["_key"], "c");

        let entries: Vec<StreamEntry> = read_stream(&state, &ReadOptions::new().keys_only())
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(entries.iter().all(|e| e.doc.is_none()));
    }
}
