//! Open-time catalog build
//!
//! 1. Seal a torn trailing record so later appends start on a fresh line
//! 2. Seed from the persisted snapshot when it matches the log
//! 3. Parse the log (or the part the snapshot does not cover)
//! 4. Verify every key's newest slot in parallel, falling back to earlier
//!    versions; drop tombstoned and non-recoverable keys
//!
//! Cache warming runs afterwards, once the catalog is known.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use super::catalog::IndexCatalog;
use super::snapshot::{IndexSnapshot, SnapshotUse};
use crate::cache::PropertyCache;
use crate::document::decode_document;
use crate::storage::{
    IntegrityVerifier, LogStore, RecordParser, Slot, StorageError, StorageResult, LINE_FEED,
    TOMBSTONE,
};

/// Summary of an open-time load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Live documents in the catalog
    pub documents: usize,
    /// Log end-of-file after loading
    pub end_offset: u64,
    /// Keys whose newest record was corrupt, with the offset kept
    pub recovered: Vec<(String, u64)>,
    /// Keys with no intact version, excluded from the catalog
    pub non_recoverable: Vec<String>,
    /// Whether a persisted snapshot seeded the catalog
    pub snapshot_used: bool,
    /// Whether a torn trailing record was sealed with a line feed
    pub sealed_tail: bool,
    /// Stray delimiters skipped while parsing
    pub resyncs: usize,
}

/// Catalog plus the report describing how it was built.
#[derive(Debug)]
pub struct LoadedIndex {
    pub catalog: IndexCatalog,
    pub report: LoadReport,
}

/// Builds the catalog for `log`, consulting the snapshot at
/// `snapshot_path` when given.
pub async fn load_index(
    log: Arc<LogStore>,
    snapshot_path: Option<PathBuf>,
) -> StorageResult<LoadedIndex> {
    let blocking_log = Arc::clone(&log);
    let (histories, mut report) =
        run_blocking(move || collect_histories(&blocking_log, snapshot_path)).await??;

    let verified = verify_histories(log, histories).await?;

    let mut catalog = IndexCatalog::new();
    for outcome in verified {
        match outcome {
            KeyOutcome::Live {
                key,
                slot,
                birth,
                fallbacks,
            } => {
                if fallbacks > 0 {
                    report.recovered.push((key.clone(), slot.offset));
                }
                catalog.insert_born(key, slot, birth);
            }
            KeyOutcome::Removed { key, fallbacks, offset } => {
                if fallbacks > 0 {
                    report.recovered.push((key, offset));
                }
            }
            KeyOutcome::Lost { key } => {
                error!(key = %key, "no intact version, key dropped");
                report.non_recoverable.push(key);
            }
        }
    }
    report.recovered.sort();
    report.non_recoverable.sort();
    report.documents = catalog.len();

    info!(
        documents = report.documents,
        end_offset = report.end_offset,
        recovered = report.recovered.len(),
        non_recoverable = report.non_recoverable.len(),
        snapshot = report.snapshot_used,
        "index loaded"
    );

    Ok(LoadedIndex { catalog, report })
}

/// Decodes and caches every admitted document. Returns the number cached.
pub fn warm_cache(log: &LogStore, catalog: &IndexCatalog, cache: &mut PropertyCache) -> usize {
    let mut warmed = 0;
    for (key, slot, _) in catalog.iter() {
        let len = slot.length as usize;
        if !cache.admits(len) {
            continue;
        }
        let doc = match log.read_slot(slot) {
            Ok(bytes) => decode_document(key, &bytes),
            Err(e) => {
                warn!(key, error = %e, "skipping cache warm");
                continue;
            }
        };
        if let Ok(Some(doc)) = doc {
            if cache.set(key, doc, len) {
                warmed += 1;
            }
        }
    }
    debug!(warmed, "cache warmed");
    warmed
}

/// Every parsed slot of a key, oldest first. A key seeded from the
/// snapshot starts with its snapshot slot and birth.
#[derive(Debug, Default)]
struct History {
    seeded_birth: Option<u64>,
    slots: Vec<Slot>,
}

type Histories = HashMap<String, History>;

fn collect_histories(
    log: &LogStore,
    snapshot_path: Option<PathBuf>,
) -> StorageResult<(Histories, LoadReport)> {
    let mut report = LoadReport::default();

    let end = log.current_end();
    if end > 0 && log.read_byte(end - 1)? != LINE_FEED {
        warn!(offset = end, "sealing torn trailing record");
        log.append_at(end, &[LINE_FEED]).map_err(|e| {
            StorageError::write_failed("Failed to seal torn trailing record", e)
        })?;
        report.sealed_tail = true;
    }
    let file_len = log.current_end();

    let mut histories: Histories = HashMap::new();
    let mut from_offset = 0;

    if let Some(snapshot) = snapshot_path.as_deref().and_then(IndexSnapshot::load) {
        match snapshot.usage(file_len) {
            SnapshotUse::Discard => {
                warn!(
                    snapshot_end = snapshot.end_offset,
                    file_len, "index snapshot ahead of log, replaying"
                );
            }
            usage => {
                for (key, slot, birth) in snapshot.entries() {
                    histories.insert(
                        key.to_string(),
                        History {
                            seeded_birth: Some(birth),
                            slots: vec![slot],
                        },
                    );
                }
                if let SnapshotUse::SeedAndResume { from_offset: resume } = usage {
                    from_offset = resume;
                } else {
                    from_offset = file_len;
                }
                report.snapshot_used = true;
                debug!(keys = histories.len(), from_offset, "seeded from snapshot");
            }
        }
    }

    if from_offset < file_len {
        let summary = RecordParser::new(log).parse(from_offset, |key, slot| {
            histories.entry(key.to_string()).or_default().slots.push(slot);
        })?;
        report.resyncs = summary.resyncs;
    }
    report.end_offset = file_len;

    Ok((histories, report))
}

enum KeyOutcome {
    Live {
        key: String,
        slot: Slot,
        birth: u64,
        fallbacks: usize,
    },
    Removed { key: String, fallbacks: usize, offset: u64 },
    Lost { key: String },
}

async fn verify_histories(log: Arc<LogStore>, histories: Histories) -> StorageResult<Vec<KeyOutcome>> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let entries: Vec<(String, History)> = histories.into_iter().collect();
    let chunk_size = (entries.len() / workers).max(256);

    let mut chunks = Vec::new();
    let mut iter = entries.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect::<Vec<_>>());
    }

    let tasks = chunks.into_iter().map(|chunk| {
        let log = Arc::clone(&log);
        run_blocking(move || verify_chunk(&log, chunk))
    });

    let mut outcomes = Vec::new();
    for result in join_all(tasks).await {
        outcomes.extend(result??);
    }
    Ok(outcomes)
}

fn verify_chunk(log: &LogStore, chunk: Vec<(String, History)>) -> StorageResult<Vec<KeyOutcome>> {
    let verifier = IntegrityVerifier::new(log);
    let mut outcomes = Vec::with_capacity(chunk.len());

    for (key, history) in chunk {
        match verifier.verify_history(&key, &history.slots) {
            Ok(verified) => {
                if is_tombstone(log, verified.slot)? {
                    outcomes.push(KeyOutcome::Removed {
                        key,
                        fallbacks: verified.fallbacks,
                        offset: verified.slot.offset,
                    });
                } else {
                    let newest = history.slots.len() - 1 - verified.fallbacks;
                    outcomes.push(KeyOutcome::Live {
                        key,
                        slot: verified.slot,
                        birth: birth_of(log, &history, newest)?,
                        fallbacks: verified.fallbacks,
                    });
                }
            }
            Err(e) if e.is_corruption() => outcomes.push(KeyOutcome::Lost { key }),
            Err(e) => return Err(e),
        }
    }
    Ok(outcomes)
}

fn is_tombstone(log: &LogStore, slot: Slot) -> StorageResult<bool> {
    Ok(slot.length as usize == TOMBSTONE.len()
        && slot.within(log.current_end())
        && log.read_slot(slot)? == TOMBSTONE)
}

/// Offset of the first record after the last tombstone before
/// `slots[live]`. Corrupt records in between still count as writes.
fn birth_of(log: &LogStore, history: &History, live: usize) -> StorageResult<u64> {
    for i in (0..live).rev() {
        if is_tombstone(log, history.slots[i])? {
            return Ok(history.slots[i + 1].offset);
        }
    }
    Ok(history
        .seeded_birth
        .unwrap_or_else(|| history.slots[0].offset))
}

async fn run_blocking<F, T>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        StorageError::io_error(
            "Load task failed",
            io::Error::new(io::ErrorKind::Other, e.to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use std::fs;
    use tempfile::TempDir;

    fn open_log(contents: &[u8]) -> (TempDir, Arc<LogStore>) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("l.jot");
        fs::write(&path, contents).unwrap();
        let log = Arc::new(LogStore::open(&path).unwrap());
        (temp_dir, log)
    }

    #[tokio::test]
    async fn test_latest_record_wins() {
        let (_dir, log) = open_log(b"a\t{\"v\":1}\nb\t{\"v\":2}\na\t{\"v\":3}\n");

        let loaded = load_index(log, None).await.unwrap();

        assert_eq!(loaded.catalog.len(), 2);
        assert_eq!(loaded.catalog.get("a"), Some(Slot::new(22, 7)));
        assert!(loaded.report.recovered.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_follows_first_write_order() {
        let (_dir, log) = open_log(
            b"z\t{}\na\t{}\nm\t{}\nz\t{\"v\":1}\na\t\"\\u0000\"\na\t{}\n",
        );

        let loaded = load_index(log, None).await.unwrap();

        let keys: Vec<String> = loaded.catalog.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "m", "a"]);
        assert_eq!(loaded.catalog.birth("z"), Some(2));
        assert_eq!(loaded.catalog.birth("a"), Some(38));
    }

    #[tokio::test]
    async fn test_tombstoned_keys_are_absent() {
        let (_dir, log) = open_log(b"a\t{\"v\":1}\na\t\"\\u0000\"\n");

        let loaded = load_index(log, None).await.unwrap();

        assert!(loaded.catalog.is_empty());
        assert_eq!(loaded.report.documents, 0);
    }

    #[tokio::test]
    async fn test_corrupt_latest_falls_back() {
        let (_dir, log) = open_log(b"a\t{\"v\":1}\na\t{\"v\":\n");

        let loaded = load_index(log, None).await.unwrap();

        assert_eq!(loaded.catalog.get("a"), Some(Slot::new(2, 7)));
        assert_eq!(loaded.report.recovered, vec![("a".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_non_recoverable_key_is_excluded() {
        let (_dir, log) = open_log(b"a\t{\"v\":\nb\t{}\n");

        let loaded = load_index(log, None).await.unwrap();

        assert!(!loaded.catalog.contains("a"));
        assert!(loaded.catalog.contains("b"));
        assert_eq!(loaded.report.non_recoverable, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_torn_tail_is_sealed() {
        let (dir, log) = open_log(b"a\t{\"v\":1}\na\t{\"v\":2");

        let loaded = load_index(log, None).await.unwrap();

        assert!(loaded.report.sealed_tail);
        assert_eq!(loaded.catalog.get("a"), Some(Slot::new(2, 7)));
        assert_eq!(loaded.report.recovered.len(), 1);
        let bytes = fs::read(dir.path().join("l.jot")).unwrap();
        assert_eq!(bytes.last(), Some(&LINE_FEED));
    }

    #[tokio::test]
    async fn test_snapshot_seeds_and_resumes() {
        let (dir, log) = open_log(b"a\t{\"v\":1}\n");
        let snapshot_path = dir.path().join("l.jot.index");
        let first = load_index(Arc::clone(&log), None).await.unwrap();
        IndexSnapshot::capture(&first.catalog, log.current_end())
            .save(&snapshot_path)
            .unwrap();

        log.append_at(log.current_end(), b"b\t{\"v\":2}\n").unwrap();

        let loaded = load_index(log, Some(snapshot_path)).await.unwrap();
        assert!(loaded.report.snapshot_used);
        assert_eq!(loaded.catalog.get("a"), Some(Slot::new(2, 7)));
        assert_eq!(loaded.catalog.get("b"), Some(Slot::new(12, 7)));
    }

    #[tokio::test]
    async fn test_snapshot_keeps_birth_of_overwritten_key() {
        let (dir, log) = open_log(b"b\t{}\na\t{}\n");
        let snapshot_path = dir.path().join("l.jot.index");
        let first = load_index(Arc::clone(&log), None).await.unwrap();
        IndexSnapshot::capture(&first.catalog, log.current_end())
            .save(&snapshot_path)
            .unwrap();

        log.append_at(log.current_end(), b"b\t{\"v\":1}\n").unwrap();

        let loaded = load_index(log, Some(snapshot_path)).await.unwrap();
        let keys: Vec<String> = loaded.catalog.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(loaded.catalog.birth("b"), Some(2));
        assert_eq!(loaded.catalog.get("b"), Some(Slot::new(12, 7)));
    }

    #[tokio::test]
    async fn test_snapshot_ahead_of_log_is_discarded() {
        let (dir, log) = open_log(b"a\t{\"v\":1}\n");
        let snapshot_path = dir.path().join("l.jot.index");
        let catalog = IndexCatalog::from_entries(vec![("ghost".to_string(), Slot::new(50, 2))]);
        IndexSnapshot::capture(&catalog, 500).save(&snapshot_path).unwrap();

        let loaded = load_index(log, Some(snapshot_path)).await.unwrap();

        assert!(!loaded.report.snapshot_used);
        assert!(!loaded.catalog.contains("ghost"));
        assert!(loaded.catalog.contains("a"));
    }

    #[tokio::test]
    async fn test_warm_cache_admits_small_documents() {
        let big = format!("b\t{{\"v\":\"{}\"}}\n", "x".repeat(64));
        let mut contents = b"a\t{\"v\":1}\n".to_vec();
        contents.extend_from_slice(big.as_bytes());
        let (_dir, log) = open_log(&contents);
        let loaded = load_index(Arc::clone(&log), None).await.unwrap();
        let mut cache = PropertyCache::new(CachePolicy::Fifo, 32, 16);

        let warmed = warm_cache(&log, &loaded.catalog, &mut cache);

        assert_eq!(warmed, 1);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }
}
