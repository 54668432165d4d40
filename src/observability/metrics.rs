//! Store counters
//!
//! - Counters only, monotonic, reset when the store is opened
//! - Relaxed atomics: values are exact once writers quiesce

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one open store.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    /// Appends that succeeded
    batches: AtomicU64,
    /// Records made durable
    records_written: AtomicU64,
    /// Bytes appended to the log
    bytes_appended: AtomicU64,
    /// Transient append failures retried
    retries: AtomicU64,
    /// Appends that failed permanently
    failed_batches: AtomicU64,
    /// Reads served from the cache
    cache_hits: AtomicU64,
    /// Reads that went to the log
    cache_misses: AtomicU64,
    /// Keys recovered from an earlier version at load
    corrupt_recovered: AtomicU64,
    /// Keys dropped at load
    non_recoverable: AtomicU64,
    /// Fetch and count calls
    queries: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one successful append of `records` records.
    pub fn record_batch(&self, records: usize, bytes: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.records_written
            .fetch_add(records as u64, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed_batches(&self) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_corrupt_recovered(&self, n: usize) {
        self.corrupt_recovered.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_non_recoverable(&self, n: usize) {
        self.non_recoverable.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn increment_queries(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            corrupt_recovered: self.corrupt_recovered.load(Ordering::Relaxed),
            non_recoverable: self.non_recoverable.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`StoreMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub batches: u64,
    pub records_written: u64,
    pub bytes_appended: u64,
    pub retries: u64,
    pub failed_batches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub corrupt_recovered: u64,
    pub non_recoverable: u64,
    pub queries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        assert_eq!(StoreMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_record_batch() {
        let metrics = StoreMetrics::new();
        metrics.record_batch(3, 120);
        metrics.record_batch(1, 30);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches, 2);
        assert_eq!(snapshot.records_written, 4);
        assert_eq!(snapshot.bytes_appended, 150);
    }

    #[test]
    fn test_snapshot_serializes_counters() {
        let metrics = StoreMetrics::new();
        metrics.increment_retries();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["retries"], 1);
        assert_eq!(json["batches"], 0);
    }
}
