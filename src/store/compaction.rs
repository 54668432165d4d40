//! Log compaction
//!
//! Rewrites every live document into a scratch log next to the current
//! one, syncs it, then renames it over the log. The catalog and cache
//! are rebuilt against the new file. Runs on the engine task, after
//! pending writes have drained, so no append can interleave with it.

use std::fs;
use std::sync::Arc;

use tracing::info;

use super::config::StoreConfig;
use super::errors::StoreResult;
use super::state::StoreState;
use crate::commit::append_all;
use crate::index::{warm_cache, IndexCatalog, IndexSnapshot};
use crate::storage::{LogRecord, LogStore, StorageError};

/// Bytes buffered before each append to the scratch log.
const CHUNK_SIZE: usize = 256 * 1024;

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactReport {
    /// Documents carried over
    pub documents: usize,
    /// Log length before
    pub bytes_before: u64,
    /// Log length after
    pub bytes_after: u64,
}

/// Compacts the log behind `state`. Blocking.
pub(crate) fn compact_log(state: &StoreState, config: &StoreConfig) -> StoreResult<CompactReport> {
    let (old_log, entries) = {
        let view = state.view()?;
        (Arc::clone(&view.log), view.catalog.entries())
    };
    let bytes_before = old_log.current_end();
    let scratch_path = config.scratch_path();

    match fs::remove_file(&scratch_path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            return Err(StorageError::io_error(
                format!("Failed to clear {}", scratch_path.display()),
                e,
            )
            .into());
        }
        _ => {}
    }

    let scratch = LogStore::open(&scratch_path)?;
    let policy = config.retry_policy();
    let mut catalog = IndexCatalog::new();
    let mut buffer = Vec::with_capacity(CHUNK_SIZE);
    let mut base = 0u64;

    let mut flush = |buffer: &mut Vec<u8>, base: &mut u64| -> StoreResult<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        append_all(&scratch, *base, buffer, policy, |_| {
            state.metrics.increment_retries();
        })?;
        scratch.advance(*base, buffer.len() as u64);
        *base += buffer.len() as u64;
        buffer.clear();
        Ok(())
    };

    for (key, slot) in entries {
        let value = old_log.read_slot(slot)?;
        let record = LogRecord::new(key, value);
        let new_slot = record.encode_into(&mut buffer, base);
        catalog.put(record.key, new_slot);
        if buffer.len() >= CHUNK_SIZE {
            flush(&mut buffer, &mut base)?;
        }
    }
    flush(&mut buffer, &mut base)?;
    scratch.close()?;

    fs::rename(&scratch_path, &config.path).map_err(|e| {
        StorageError::io_error(
            format!(
                "Failed to move {} over {}",
                scratch_path.display(),
                config.path.display()
            ),
            e,
        )
    })?;
    IndexSnapshot::remove(&config.index_path())?;

    let log = Arc::new(LogStore::open(&config.path)?);
    let bytes_after = log.current_end();
    let documents = catalog.len();
    state.install(log, catalog)?;

    if config.warm_cache {
        let view = state.view()?;
        let mut cache = state.cache();
        warm_cache(&view.log, &view.catalog, &mut cache);
    }

    info!(
        path = %config.path.display(),
        documents,
        bytes_before,
        bytes_after,
        "log compacted"
    );
    Ok(CompactReport {
        documents,
        bytes_before,
        bytes_after,
    })
}
