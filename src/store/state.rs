//! State shared between the engine task and readers
//!
//! Lock order is always view, then cache. The engine holds the view write
//! lock while it updates the cache, so a reader that checks the catalog
//! under the view read lock never caches a value the engine has already
//! superseded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cache::PropertyCache;
use crate::commit::CommitBatch;
use crate::document::{decode_document, Document};
use crate::index::IndexCatalog;
use crate::observability::{EventBus, StoreMetrics};
use crate::storage::{LogStore, Slot};

use super::errors::{StoreError, StoreResult};

/// A catalog and the log its slots point into.
#[derive(Debug)]
pub struct LogView {
    pub log: Arc<LogStore>,
    pub catalog: IndexCatalog,
}

/// How a key resolves before touching the log.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Decoded document, from the cache
    Resolved(Document),
    /// Needs a read of this slot
    Deferred(Slot),
}

pub(crate) struct StoreState {
    view: RwLock<LogView>,
    cache: Mutex<PropertyCache>,
    pub events: EventBus,
    pub metrics: StoreMetrics,
    closed: AtomicBool,
}

impl StoreState {
    pub fn new(log: Arc<LogStore>, cache: PropertyCache, events: EventBus) -> Self {
        Self {
            view: RwLock::new(LogView {
                log,
                catalog: IndexCatalog::new(),
            }),
            cache: Mutex::new(cache),
            events,
            metrics: StoreMetrics::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn view(&self) -> StoreResult<RwLockReadGuard<'_, LogView>> {
        self.view
            .read()
            .map_err(|_| StoreError::FatalIo("catalog lock poisoned".to_string()))
    }

    fn view_mut(&self) -> StoreResult<RwLockWriteGuard<'_, LogView>> {
        self.view
            .write()
            .map_err(|_| StoreError::FatalIo("catalog lock poisoned".to_string()))
    }

    /// The cache only holds reconstructable data, so a poisoned lock is
    /// recovered rather than surfaced.
    pub fn cache(&self) -> MutexGuard<'_, PropertyCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self) -> StoreResult<Arc<LogStore>> {
        Ok(Arc::clone(&self.view()?.log))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Replaces the log and catalog, dropping every cached document.
    pub fn install(&self, log: Arc<LogStore>, catalog: IndexCatalog) -> StoreResult<()> {
        let mut view = self.view_mut()?;
        view.log = log;
        view.catalog = catalog;
        self.cache().clear();
        Ok(())
    }

    /// Commits a landed batch: moves the log's known end past its `bytes`,
    /// then updates the catalog and cache in batch order. Nothing moves if
    /// the catalog lock cannot be taken.
    pub fn apply_batch(&self, log: &LogStore, batch: &CommitBatch, bytes: u64) -> StoreResult<()> {
        let mut view = self.view_mut()?;
        log.advance(batch.base(), bytes);
        let mut cache = self.cache();
        for (write, slot) in batch.items() {
            match &write.doc {
                Some(doc) => {
                    view.catalog.put(write.key(), *slot);
                    cache.set(write.key(), doc.clone(), slot.length as usize);
                }
                None => {
                    view.catalog.remove(write.key());
                    cache.evict(write.key());
                }
            }
        }
        Ok(())
    }

    /// Looks `key` up in the catalog and cache. `None` means the key is
    /// not live.
    pub fn lookup(&self, key: &str) -> StoreResult<Option<(Arc<LogStore>, Resolution)>> {
        let view = self.view()?;
        let slot = match view.catalog.get(key) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let cached = self.cache().get(key);
        let resolution = match cached {
            Some(doc) => {
                self.metrics.increment_cache_hits();
                Resolution::Resolved(doc)
            }
            None => {
                self.metrics.increment_cache_misses();
                Resolution::Deferred(slot)
            }
        };
        Ok(Some((Arc::clone(&view.log), resolution)))
    }

    /// Like [`lookup`](Self::lookup) for a known slot, used when iterating
    /// a copied catalog.
    pub fn resolve_slot(&self, key: &str, slot: Slot) -> Resolution {
        match self.cache().get(key) {
            Some(doc) => {
                self.metrics.increment_cache_hits();
                Resolution::Resolved(doc)
            }
            None => {
                self.metrics.increment_cache_misses();
                Resolution::Deferred(slot)
            }
        }
    }

    /// Reads and decodes `slot` from `log`. Blocking.
    ///
    /// The decoded document is cached only if the catalog still points at
    /// `slot`.
    pub fn read_document(&self, log: &LogStore, key: &str, slot: Slot) -> StoreResult<Document> {
        let bytes = log.read_slot(slot)?;
        let doc = decode_document(key, &bytes)
            .map_err(|e| StoreError::decode(key, e))?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let view = self.view()?;
        if view.catalog.get(key) == Some(slot) && std::ptr::eq(Arc::as_ptr(&view.log), log) {
            self.cache().set(key, doc.clone(), slot.length as usize);
        }
        Ok(doc)
    }

    /// Resolves `key` to its current document.
    pub async fn get(self: &Arc<Self>, key: &str) -> StoreResult<Document> {
        let (log, resolution) = self
            .lookup(key)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        match resolution {
            Resolution::Resolved(doc) => Ok(doc),
            Resolution::Deferred(slot) => self.read_deferred(log, key.to_string(), slot).await,
        }
    }

    /// Reads a deferred slot on the blocking pool.
    pub async fn read_deferred(
        self: &Arc<Self>,
        log: Arc<LogStore>,
        key: String,
        slot: Slot,
    ) -> StoreResult<Document> {
        let state = Arc::clone(self);
        tokio::task::spawn_blocking(move || state.read_document(&log, &key, slot))
            .await
            .map_err(|e| StoreError::FatalIo(format!("read task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::commit::PendingWrite;
    use crate::storage::LogRecord;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn batch(base: u64) -> CommitBatch {
        let (done, _rx) = oneshot::channel();
        let doc = json!({"n": 1}).as_object().cloned().unwrap();
        let write = PendingWrite::put("a".to_string(), b"{\"n\":1}".to_vec(), doc, 0, done);
        CommitBatch::encode(vec![write], base)
    }

    fn state(dir: &TempDir) -> (Arc<StoreState>, Arc<LogStore>) {
        let log = Arc::new(LogStore::open(&dir.path().join("s.jot")).unwrap());
        let cache = PropertyCache::new(CachePolicy::Fifo, 1024, 16);
        let state = StoreState::new(Arc::clone(&log), cache, EventBus::new(4));
        (Arc::new(state), log)
    }

    #[test]
    fn test_apply_batch_advances_and_indexes() {
        let dir = TempDir::new().unwrap();
        let (state, log) = state(&dir);
        let mut batch = batch(0);
        let buffer = batch.release_buffer();
        log.write_at(0, &buffer).unwrap();

        state.apply_batch(&log, &batch, buffer.len() as u64).unwrap();

        assert_eq!(log.current_end(), LogRecord::new("a", b"{\"n\":1}".to_vec()).line_len() as u64);
        let view = state.view().unwrap();
        assert_eq!(view.catalog.get("a"), Some(Slot::new(2, 7)));
        assert!(state.cache().contains("a"));
    }

    #[test]
    fn test_poisoned_catalog_leaves_end_in_place() {
        let dir = TempDir::new().unwrap();
        let (state, log) = state(&dir);
        let poisoner = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.view.write().unwrap();
            panic!("poison the catalog lock");
        })
        .join();

        let mut batch = batch(0);
        let buffer = batch.release_buffer();
        log.write_at(0, &buffer).unwrap();

        assert!(state.apply_batch(&log, &batch, buffer.len() as u64).is_err());
        assert_eq!(log.current_end(), 0);
        log.discard_tail().unwrap();
        assert_eq!(log.file_len().unwrap(), 0);
    }
}
