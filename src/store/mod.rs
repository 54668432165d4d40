//! Store handle for jotdb
//!
//! `Store` is the public surface: a cheap, cloneable handle onto one log
//! file and the engine task that owns its write side.
//!
//! # Design Principles
//!
//! - Bad keys and bad values are rejected before a write is queued
//! - Writes are queued in call order, including writes made while the
//!   store is still loading
//! - Reads wait for the load to finish, then never wait on writes
//! - A query that matches nothing returns `FetchOutcome::NoRecords`

pub(crate) mod compaction;
mod config;
mod dump;
mod errors;
mod registry;
pub(crate) mod state;
mod stream;

pub use compaction::CompactReport;
pub use config::StoreConfig;
pub use errors::{StoreError, StoreResult};
pub use registry::StoreRegistry;
pub use stream::{DocumentStream, ReadOptions, StreamEntry};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::pin_mut;
use futures_util::stream::TryStreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::cache::{CacheStats, PropertyCache};
use crate::commit::{Command, CommitPipeline, Readiness, WriteOp};
use crate::document::Document;
use crate::index::{IndexSnapshot, LoadReport};
use crate::observability::{EventBus, MetricsSnapshot, TimedEvent};
use crate::query::{resolve_entries, FetchOptions, FetchOutcome, Filter, QueryEngine};
use crate::storage::{is_valid_key, LogStore, StorageError};
use state::StoreState;

/// Handle onto an open store.
#[derive(Clone)]
pub struct Store {
    state: Arc<StoreState>,
    commands: mpsc::UnboundedSender<Command>,
    ready: watch::Receiver<Readiness>,
    // Keeps the readiness channel open after the engine task stops.
    _ready_tx: Arc<watch::Sender<Readiness>>,
    config: Arc<StoreConfig>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.config.path)
            .field("closed", &self.state.is_closed())
            .finish()
    }
}

impl Store {
    /// Opens the log at `path` with default configuration.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with(StoreConfig::new(path))
    }

    /// Opens a store and starts loading it in the background.
    ///
    /// Must be called within a tokio runtime. Use [`ready`](Self::ready)
    /// to wait for the load; writes may be issued immediately.
    pub fn open_with(config: StoreConfig) -> StoreResult<Self> {
        if config.path.as_os_str().is_empty() {
            return Err(StoreError::BadValue("log path is empty".to_string()));
        }

        let log = Arc::new(LogStore::open(&config.path)?);
        let cache = PropertyCache::new(config.cache_policy, config.cache_limit, config.cache_size);
        let events = EventBus::new(config.event_capacity);
        let state = Arc::new(StoreState::new(log, cache, events));

        let (commands, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready) = watch::channel(Readiness::Loading);
        let ready_tx = Arc::new(ready_tx);

        let pipeline = CommitPipeline::new(Arc::clone(&state), config.clone(), rx);
        tokio::spawn(pipeline.run(Arc::clone(&ready_tx)));
        info!(path = %config.path.display(), "store opening");

        Ok(Self {
            state,
            commands,
            ready,
            _ready_tx: ready_tx,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Waits for the load to finish and returns its report.
    pub async fn ready(&self) -> StoreResult<LoadReport> {
        let mut ready = self.ready.clone();
        let readiness = ready
            .wait_for(|r| !matches!(r, Readiness::Loading))
            .await
            .map_err(|_| StoreError::Closed)?;
        match &*readiness {
            Readiness::Ready(report) => Ok(report.clone()),
            Readiness::Failed(e) => Err(e.clone()),
            Readiness::Loading => Err(StoreError::Closed),
        }
    }

    /// Whether the load has finished successfully.
    pub fn is_ready(&self) -> bool {
        matches!(*self.ready.borrow(), Readiness::Ready(_))
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    // ==================
    // Writes
    // ==================

    /// Stores `doc` under `key`, replacing any previous document.
    pub async fn set(&self, key: &str, doc: Value) -> StoreResult<()> {
        let op = WriteOp::put(key, into_document(doc)?);
        self.write(op).await
    }

    /// Merges the top-level properties of `patch` into the document at
    /// `key`.
    pub async fn update(&self, key: &str, patch: Value) -> StoreResult<()> {
        let op = WriteOp::merge(key, into_document(patch)?);
        self.write(op).await
    }

    /// Removes the document at `key`.
    pub async fn remove(&self, key: &str) -> StoreResult<()> {
        self.write(WriteOp::delete(key)).await
    }

    /// Runs one write and waits for its batch to land.
    pub async fn write(&self, op: WriteOp) -> StoreResult<()> {
        let done = self.submit(op)?;
        done.await.unwrap_or(Err(StoreError::Closed))
    }

    /// Queues every op before waiting on any, so they share flushes.
    /// Results are in op order.
    pub async fn write_batch(&self, ops: Vec<WriteOp>) -> Vec<StoreResult<()>> {
        let pending: Vec<_> = ops.into_iter().map(|op| self.submit(op)).collect();
        join_all(pending.into_iter().map(|submitted| async move {
            match submitted {
                Ok(done) => done.await.unwrap_or(Err(StoreError::Closed)),
                Err(e) => Err(e),
            }
        }))
        .await
    }

    fn submit(&self, op: WriteOp) -> StoreResult<oneshot::Receiver<StoreResult<()>>> {
        if !is_valid_key(op.key()) {
            return Err(StoreError::BadKey(op.key().to_string()));
        }
        self.state.ensure_open()?;

        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Write { op, done })
            .map_err(|_| StoreError::Closed)?;
        Ok(rx)
    }

    /// Waits until every write issued before this call has landed or
    /// failed.
    pub async fn flush(&self) -> StoreResult<()> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Flush { done })
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    // ==================
    // Reads
    // ==================

    /// Current document at `key`, with `_key` set.
    pub async fn get(&self, key: &str) -> StoreResult<Document> {
        if !is_valid_key(key) {
            return Err(StoreError::BadKey(key.to_string()));
        }
        self.ready().await?;
        self.state.get(key).await
    }

    /// Runs a JSON predicate.
    pub async fn fetch(&self, predicate: &Value, options: FetchOptions) -> StoreResult<FetchOutcome> {
        let filter = Filter::parse(predicate)?;
        self.query(&filter, &options).await
    }

    /// Runs a parsed filter.
    pub async fn query(&self, filter: &Filter, options: &FetchOptions) -> StoreResult<FetchOutcome> {
        self.ready().await?;
        self.engine().fetch(filter, options).await
    }

    /// Number of documents matching a JSON predicate.
    pub async fn count(&self, predicate: &Value) -> StoreResult<usize> {
        let filter = Filter::parse(predicate)?;
        self.ready().await?;
        self.engine().count(&filter).await
    }

    /// Every live document in first-write order.
    pub async fn all(&self) -> StoreResult<Vec<Document>> {
        self.ready().await?;
        self.engine().documents().await
    }

    /// Calls `visit` with every live document in first-write order. Returns how
    /// many were visited.
    pub async fn each<F>(&self, mut visit: F) -> StoreResult<usize>
    where
        F: FnMut(Document),
    {
        self.ready().await?;
        let (log, entries) = {
            let view = self.state.view()?;
            (Arc::clone(&view.log), view.catalog.entries())
        };
        let documents = resolve_entries(Arc::clone(&self.state), log, entries, None);
        pin_mut!(documents);

        let mut visited = 0;
        while let Some(resolved) = documents.try_next().await? {
            if let Some((_, doc)) = resolved {
                visit(doc);
                visited += 1;
            }
        }
        Ok(visited)
    }

    /// Streams catalog entries as of the call.
    pub async fn stream(&self, options: ReadOptions) -> StoreResult<DocumentStream> {
        self.ready().await?;
        stream::read_stream(&self.state, &options)
    }

    /// Whether `key` is currently live.
    pub async fn contains(&self, key: &str) -> StoreResult<bool> {
        self.ready().await?;
        Ok(self.state.view()?.catalog.contains(key))
    }

    /// Live documents right now.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.state.view()?.catalog.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Known end of the log, in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.state.log()?.current_end())
    }

    // ==================
    // Maintenance
    // ==================

    /// Writes every live document to `<path>.json` and returns that path.
    pub async fn dump(&self) -> StoreResult<PathBuf> {
        self.ready().await?;
        self.flush().await?;
        let path = self.config.dump_path();
        dump::dump_documents(&self.state, &path, self.config.pretty_dump).await?;
        Ok(path)
    }

    /// Rewrites the log with only live documents.
    pub async fn compact(&self) -> StoreResult<CompactReport> {
        self.ready().await?;
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Compact { done })
            .map_err(|_| StoreError::Closed)?;
        rx.await.unwrap_or(Err(StoreError::Closed))
    }

    /// Drains pending writes, syncs, saves the snapshot if configured and
    /// stops the engine. Later calls on any handle fail with `Closed`.
    pub async fn close(&self) -> StoreResult<()> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Close { done })
            .map_err(|_| StoreError::Closed)?;
        rx.await.unwrap_or(Err(StoreError::Closed))
    }

    /// Closes the store and deletes its log and snapshot.
    pub async fn destroy(self) -> StoreResult<()> {
        match self.close().await {
            Ok(()) | Err(StoreError::Closed) => {}
            Err(e) => return Err(e),
        }
        let path = self.config.path.clone();
        let index = self.config.index_path();
        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            match std::fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    return Err(StorageError::io_error(
                        format!("Failed to remove {}", path.display()),
                        e,
                    )
                    .into());
                }
                _ => {}
            }
            IndexSnapshot::remove(&index)?;
            debug!(path = %path.display(), "store destroyed");
            Ok(())
        })
        .await
        .map_err(|e| StoreError::FatalIo(format!("destroy task failed: {}", e)))?
    }

    // ==================
    // Observability
    // ==================

    /// Receives lifecycle and commit events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TimedEvent> {
        self.state.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.state.cache().stats()
    }

    fn engine(&self) -> QueryEngine {
        QueryEngine::new(Arc::clone(&self.state), self.config.cache_limit)
    }
}

fn into_document(value: Value) -> StoreResult<Document> {
    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::BadValue(format!(
            "documents must be JSON objects, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WriteFault;
    use serde_json::json;
    use std::io;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_rejects_bad_input_before_queueing() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("t.jot")).unwrap();

        let err = store.set("a\tb", json!({})).await.unwrap_err();
        assert_eq!(err, StoreError::BadKey("a\tb".into()));
        let err = store.set("", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::BadKey(_)));
        let err = store.set("a", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, StoreError::BadValue(_)));
        let err = store.update("a", json!(3)).await.unwrap_err();
        assert!(matches!(err, StoreError::BadValue(_)));

        store.ready().await.unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(store.size().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_writes_before_ready_are_applied_in_order() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("t.jot")).unwrap();

        let first = store.set("k", json!({"v": 1}));
        let second = store.update("k", json!({"w": 2}));
        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();

        let doc = store.get("k").await.unwrap();
        assert_eq!(doc["v"], 1);
        assert_eq!(doc["w"], 2);
    }

    #[tokio::test]
    async fn test_remove_and_update_missing_key() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("t.jot")).unwrap();

        assert_eq!(
            store.remove("ghost").await,
            Err(StoreError::NoSuchKey("ghost".into()))
        );
        assert_eq!(
            store.update("ghost", json!({"a": 1})).await,
            Err(StoreError::NoSuchKey("ghost".into()))
        );
    }

    #[tokio::test]
    async fn test_close_rejects_later_calls() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("t.jot")).unwrap();
        store.set("a", json!({"n": 1})).await.unwrap();

        store.close().await.unwrap();

        assert!(store.is_closed());
        assert_eq!(store.set("b", json!({})).await, Err(StoreError::Closed));
        assert_eq!(store.close().await, Err(StoreError::Closed));
        // Reads of already-durable state still work.
        assert_eq!(store.get("a").await.unwrap()["n"], 1);
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn failing_store(dir: &TempDir) -> Store {
        let config = StoreConfig::new(dir.path().join("f.jot"))
            .with_write_retries(2)
            .with_retry_delay(Duration::from_millis(30));
        Store::open_with(config).unwrap()
    }

    #[tokio::test]
    async fn test_failed_append_fails_whole_batch() {
        let dir = TempDir::new().unwrap();
        let store = failing_store(&dir);
        store.set("a", json!({"v": 1})).await.unwrap();
        let log = store.state.log().unwrap();
        log.inject_faults([
            WriteFault::Delay(Duration::from_millis(30)),
            WriteFault::Short(3),
            WriteFault::Fail(io::ErrorKind::PermissionDenied),
        ]);

        // "x" holds the append in flight while "a" and "b" share the next batch.
        let results = store
            .write_batch(vec![
                WriteOp::put("x", doc(json!({"v": 0}))),
                WriteOp::put("a", doc(json!({"v": 2}))),
                WriteOp::put("b", doc(json!({"v": 3}))),
            ])
            .await;

        assert_eq!(results[0], Ok(()));
        assert!(matches!(results[1], Err(StoreError::FatalIo(_))));
        assert!(matches!(results[2], Err(StoreError::FatalIo(_))));

        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.get("a").await.unwrap()["v"], 1);
        assert_eq!(store.get("b").await, Err(StoreError::NotFound("b".into())));
        assert_eq!(log.file_len().unwrap(), store.size().unwrap());
        assert_eq!(store.metrics().failed_batches, 1);

        store.set("b", json!({"v": 4})).await.unwrap();
        store.close().await.unwrap();
        let reopened = Store::open(dir.path().join("f.jot")).unwrap();
        assert_eq!(reopened.ready().await.unwrap().documents, 3);
        assert_eq!(reopened.get("a").await.unwrap()["v"], 1);
        assert_eq!(reopened.get("b").await.unwrap()["v"], 4);
    }

    #[tokio::test]
    async fn test_writes_built_on_a_failed_write_fail_with_it() {
        let dir = TempDir::new().unwrap();
        let store = failing_store(&dir);
        store.ready().await.unwrap();
        store.state.log().unwrap().inject_faults([
            WriteFault::Fail(io::ErrorKind::WouldBlock),
            WriteFault::Fail(io::ErrorKind::WouldBlock),
        ]);

        let results = store
            .write_batch(vec![
                WriteOp::put("k", doc(json!({"v": 1}))),
                WriteOp::merge("k", doc(json!({"w": 2}))),
                WriteOp::delete("k"),
            ])
            .await;

        for result in &results {
            assert!(matches!(result, Err(StoreError::FatalIo(_))), "{:?}", result);
        }
        assert_eq!(store.get("k").await, Err(StoreError::NotFound("k".into())));
        assert_eq!(store.size().unwrap(), 0);
        assert_eq!(store.metrics().retries, 1);

        assert_eq!(
            store.update("k", json!({"w": 2})).await,
            Err(StoreError::NoSuchKey("k".into()))
        );
        store.set("k", json!({"v": 1})).await.unwrap();
        store.update("k", json!({"w": 2})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap()["w"], 2);
    }
}
