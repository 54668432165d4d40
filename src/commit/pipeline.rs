//! Commit pipeline
//!
//! One engine task per store owns the write side. It loads the catalog,
//! signals readiness, then serves mutation requests in arrival order.
//!
//! # Flush rules
//!
//! - At most one append is in flight
//! - Requests that arrive during a flush join the pending batch
//! - When the in-flight append lands, the whole pending batch becomes the
//!   next append
//! - Catalog and cache change only after an append succeeds; a failed
//!   append fails every write in its batch and leaves both untouched
//! - A queued update or removal prepared against a write that later fails
//!   fails with the same error
//!
//! Requests sent before the load finishes wait in the channel and are
//! served in the order they were sent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::append::append_all;
use super::batch::{CommitBatch, Completion, PendingWrite};
use crate::document::{encode_document, merge_documents, with_key, without_key, Document};
use crate::index::{load_index, warm_cache, IndexSnapshot, LoadReport};
use crate::observability::StoreEvent;
use crate::storage::{LogStore, StorageResult};
use crate::store::compaction::{compact_log, CompactReport};
use crate::store::state::StoreState;
use crate::store::{StoreConfig, StoreError, StoreResult};

/// A single document mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the document
    Put { key: String, doc: Document },
    /// Shallow-merge into the existing document
    Merge { key: String, patch: Document },
    /// Remove the document
    Delete { key: String },
}

impl WriteOp {
    pub fn put(key: impl Into<String>, doc: Document) -> Self {
        WriteOp::Put {
            key: key.into(),
            doc,
        }
    }

    pub fn merge(key: impl Into<String>, patch: Document) -> Self {
        WriteOp::Merge {
            key: key.into(),
            patch,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        WriteOp::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Merge { key, .. } | WriteOp::Delete { key } => {
                key
            }
        }
    }
}

/// Requests served by the engine task.
pub(crate) enum Command {
    Write {
        op: WriteOp,
        done: Completion,
    },
    /// Resolves once every earlier write has landed or failed
    Flush { done: oneshot::Sender<()> },
    Compact {
        done: oneshot::Sender<StoreResult<CompactReport>>,
    },
    Close {
        done: oneshot::Sender<StoreResult<()>>,
    },
}

/// Load state published to readers.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    Loading,
    Ready(LoadReport),
    Failed(StoreError),
}

/// Latest not-yet-durable value of a key, visible to later requests.
struct Staged {
    doc: Option<Document>,
    seq: u64,
}

/// What a mutation turns into once validated against current state.
enum Prepared {
    Put {
        key: String,
        value: Vec<u8>,
        doc: Document,
    },
    Remove {
        key: String,
    },
}

struct InFlight {
    batch: CommitBatch,
    log: Arc<LogStore>,
    bytes: usize,
    handle: JoinHandle<StorageResult<()>>,
}

enum Next {
    Command(Option<Command>),
    Landed(Result<StorageResult<()>, JoinError>),
}

/// The engine task.
pub(crate) struct CommitPipeline {
    state: Arc<StoreState>,
    config: StoreConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: Vec<PendingWrite>,
    staged: HashMap<String, Staged>,
    next_seq: u64,
    in_flight: Option<InFlight>,
}

impl CommitPipeline {
    pub fn new(
        state: Arc<StoreState>,
        config: StoreConfig,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            state,
            config,
            commands,
            pending: Vec::new(),
            staged: HashMap::new(),
            next_seq: 0,
            in_flight: None,
        }
    }

    /// Loads the store, then serves requests until closed.
    pub async fn run(mut self, ready: Arc<watch::Sender<Readiness>>) {
        self.state.events.publish(StoreEvent::Opening);
        match self.load().await {
            Ok(report) => {
                self.state.events.publish(StoreEvent::Ready {
                    documents: report.documents,
                    corrupt: report.recovered.len() + report.non_recoverable.len(),
                });
                ready.send_replace(Readiness::Ready(report));
            }
            Err(e) => {
                error!(path = %self.config.path.display(), error = %e, "load failed");
                self.state.mark_closed();
                ready.send_replace(Readiness::Failed(e.clone()));
                self.reject_remaining(e);
                return;
            }
        }

        loop {
            let next = tokio::select! {
                command = self.commands.recv() => Next::Command(command),
                landed = wait_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    Next::Landed(landed)
                }
            };

            match next {
                Next::Command(Some(Command::Write { op, done })) => {
                    self.enqueue(op, done).await;
                }
                Next::Command(Some(Command::Flush { done })) => {
                    self.drain().await;
                    let _ = done.send(());
                }
                Next::Command(Some(Command::Compact { done })) => {
                    self.drain().await;
                    let _ = done.send(self.compact().await);
                }
                Next::Command(Some(Command::Close { done })) => {
                    let _ = done.send(self.shutdown().await);
                    break;
                }
                Next::Command(None) => {
                    if let Err(e) = self.shutdown().await {
                        warn!(error = %e, "close on drop failed");
                    }
                    break;
                }
                Next::Landed(landed) => self.finish(landed),
            }

            self.start_flush();
        }

        self.reject_remaining(StoreError::Closed);
    }

    async fn load(&mut self) -> StoreResult<LoadReport> {
        let log = self.state.log()?;
        let snapshot = self.config.save_index.then(|| self.config.index_path());
        let loaded = load_index(Arc::clone(&log), snapshot).await?;

        for (key, offset) in &loaded.report.recovered {
            self.state.events.publish(StoreEvent::Corrupt {
                key: key.clone(),
                offset: *offset,
            });
        }
        for key in &loaded.report.non_recoverable {
            self.state
                .events
                .publish(StoreEvent::NonRecoverable { key: key.clone() });
        }
        self.state
            .metrics
            .add_corrupt_recovered(loaded.report.recovered.len());
        self.state
            .metrics
            .add_non_recoverable(loaded.report.non_recoverable.len());

        self.state.install(log, loaded.catalog)?;

        if self.config.warm_cache {
            let state = Arc::clone(&self.state);
            tokio::task::spawn_blocking(move || -> StoreResult<usize> {
                let view = state.view()?;
                let mut cache = state.cache();
                Ok(warm_cache(&view.log, &view.catalog, &mut cache))
            })
            .await
            .map_err(|e| StoreError::FatalIo(format!("cache warm task failed: {}", e)))??;
        }

        info!(
            path = %self.config.path.display(),
            documents = loaded.report.documents,
            "store ready"
        );
        Ok(loaded.report)
    }

    async fn enqueue(&mut self, op: WriteOp, done: Completion) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let basis = match &op {
            WriteOp::Put { .. } => None,
            WriteOp::Merge { key, .. } | WriteOp::Delete { key } => {
                self.staged.get(key).map(|staged| staged.seq)
            }
        };
        let prepared = match self.prepare(op).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = done.send(Err(e));
                return;
            }
        };

        let write = match prepared {
            Prepared::Put { key, value, doc } => {
                self.staged.insert(
                    key.clone(),
                    Staged {
                        doc: Some(doc.clone()),
                        seq,
                    },
                );
                PendingWrite::put(key, value, doc, seq, done)
            }
            Prepared::Remove { key } => {
                self.staged.insert(key.clone(), Staged { doc: None, seq });
                PendingWrite::remove(key, seq, done)
            }
        };
        self.pending.push(write.built_on(basis));
    }

    async fn prepare(&self, op: WriteOp) -> StoreResult<Prepared> {
        match op {
            WriteOp::Put { key, doc } => encode_put(key, doc),
            WriteOp::Merge { key, patch } => match self.current(&key).await? {
                Some(base) => encode_put(key.clone(), merge_documents(&base, &without_key(patch))),
                None => Err(StoreError::NoSuchKey(key)),
            },
            WriteOp::Delete { key } => {
                if self.exists(&key)? {
                    Ok(Prepared::Remove { key })
                } else {
                    Err(StoreError::NoSuchKey(key))
                }
            }
        }
    }

    /// Latest value of `key` as the next write sees it: staged first, then
    /// the catalog.
    async fn current(&self, key: &str) -> StoreResult<Option<Document>> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.doc.clone());
        }
        match self.state.get(key).await {
            Ok(doc) => Ok(Some(doc)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.doc.is_some());
        }
        Ok(self.state.view()?.catalog.contains(key))
    }

    /// Starts an append of everything pending, unless one is in flight.
    fn start_flush(&mut self) {
        if self.in_flight.is_some() || self.pending.is_empty() {
            return;
        }
        let writes = std::mem::take(&mut self.pending);

        let log = match self.state.log() {
            Ok(log) => log,
            Err(e) => {
                let mut failed = HashSet::new();
                for mut write in writes {
                    self.unstage(&write);
                    failed.insert(write.seq);
                    write.complete(Err(e.clone()));
                }
                self.fail_dependents(failed, &e);
                return;
            }
        };

        let base = log.current_end();
        let mut batch = CommitBatch::encode(writes, base);
        let buffer = batch.release_buffer();
        let bytes = buffer.len();
        debug!(records = batch.len(), bytes, base, "flushing batch");

        let policy = self.config.retry_policy();
        let sync = self.config.sync_on_commit;
        let task_log = Arc::clone(&log);
        let state = Arc::clone(&self.state);
        let handle = tokio::task::spawn_blocking(move || -> StorageResult<()> {
            append_all(&*task_log, base, &buffer, policy, |attempt| {
                state.metrics.increment_retries();
                state.events.publish(StoreEvent::Retry { attempt });
            })?;
            if sync {
                task_log.sync()?;
            }
            Ok(())
        });

        self.in_flight = Some(InFlight {
            batch,
            log,
            bytes,
            handle,
        });
    }

    /// Commits or fails the batch whose append just finished.
    fn finish(&mut self, landed: Result<StorageResult<()>, JoinError>) {
        let InFlight {
            mut batch,
            log,
            bytes,
            ..
        } = match self.in_flight.take() {
            Some(flight) => flight,
            None => return,
        };

        let appended = match landed {
            Ok(result) => result.map_err(StoreError::from),
            Err(e) => Err(StoreError::FatalIo(format!("append task failed: {}", e))),
        };

        let outcome = appended.and_then(|()| self.state.apply_batch(&log, &batch, bytes as u64));

        match &outcome {
            Ok(()) => {
                self.state.metrics.record_batch(batch.len(), bytes);
                debug!(records = batch.len(), bytes, "batch committed");
            }
            Err(e) => {
                self.state.metrics.increment_failed_batches();
                error!(records = batch.len(), base = batch.base(), error = %e, "append failed");
                if let Err(discard) = log.discard_tail() {
                    warn!(error = %discard, "failed to discard partial append");
                }
            }
        }

        for (write, _) in batch.items_mut() {
            self.unstage(write);
            write.complete(outcome.clone());
            if outcome.is_ok() {
                let key = write.key().to_string();
                self.state.events.publish(if write.doc.is_some() {
                    StoreEvent::Put { key }
                } else {
                    StoreEvent::Del { key }
                });
            }
        }
        match outcome {
            Ok(()) => self
                .state
                .events
                .publish(StoreEvent::Batch { size: batch.len() }),
            Err(e) => {
                let failed = batch.items().map(|(write, _)| write.seq).collect();
                self.fail_dependents(failed, &e);
            }
        }
    }

    /// Fails every pending write prepared against a write in `failed`,
    /// directly or through another failed write.
    fn fail_dependents(&mut self, mut failed: HashSet<u64>, err: &StoreError) {
        let pending = std::mem::take(&mut self.pending);
        for mut write in pending {
            if write.basis.map_or(false, |basis| failed.contains(&basis)) {
                debug!(key = write.key(), seq = write.seq, "failing write built on a failed write");
                self.unstage(&write);
                failed.insert(write.seq);
                write.complete(Err(err.clone()));
            } else {
                self.pending.push(write);
            }
        }
    }

    /// Drops the staged value if `write` is still the latest for its key.
    fn unstage(&mut self, write: &PendingWrite) {
        if self
            .staged
            .get(write.key())
            .map_or(false, |staged| staged.seq == write.seq)
        {
            self.staged.remove(write.key());
        }
    }

    /// Runs appends until nothing is pending or in flight.
    async fn drain(&mut self) {
        loop {
            if self.in_flight.is_some() {
                let landed = wait_in_flight(&mut self.in_flight).await;
                self.finish(landed);
            }
            if self.pending.is_empty() {
                break;
            }
            self.start_flush();
        }
    }

    async fn compact(&mut self) -> StoreResult<CompactReport> {
        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let report = tokio::task::spawn_blocking(move || compact_log(&state, &config))
            .await
            .map_err(|e| StoreError::FatalIo(format!("compaction task failed: {}", e)))??;

        self.state.events.publish(StoreEvent::Compacted {
            before: report.bytes_before,
            after: report.bytes_after,
        });
        Ok(report)
    }

    /// Drains, syncs and persists the snapshot if configured.
    async fn shutdown(&mut self) -> StoreResult<()> {
        self.drain().await;
        self.commands.close();

        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let result = tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let view = state.view()?;
            view.log.sync()?;
            if config.save_index {
                IndexSnapshot::capture(&view.catalog, view.log.current_end())
                    .save(&config.index_path())?;
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::FatalIo(format!("close task failed: {}", e)))
        .and_then(|r| r);

        self.state.mark_closed();
        self.state.events.publish(StoreEvent::Closed);
        info!(path = %self.config.path.display(), "store closed");
        result
    }

    /// Answers every request still queued with `err`.
    fn reject_remaining(&mut self, err: StoreError) {
        self.commands.close();
        for mut write in self.pending.drain(..) {
            write.complete(Err(err.clone()));
        }
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Write { done, .. } => {
                    let _ = done.send(Err(err.clone()));
                }
                Command::Flush { done } => {
                    let _ = done.send(());
                }
                Command::Compact { done } => {
                    let _ = done.send(Err(err.clone()));
                }
                Command::Close { done } => {
                    let _ = done.send(Err(err.clone()));
                }
            }
        }
    }
}

fn encode_put(key: String, doc: Document) -> StoreResult<Prepared> {
    let doc = without_key(doc);
    let value = encode_document(&doc).map_err(|e| StoreError::BadValue(e.to_string()))?;
    let doc = with_key(doc, &key);
    Ok(Prepared::Put { key, value, doc })
}

async fn wait_in_flight(
    in_flight: &mut Option<InFlight>,
) -> Result<StorageResult<()>, JoinError> {
    match in_flight {
        Some(flight) => (&mut flight.handle).await,
        None => std::future::pending().await,
    }
}
