//! Store configuration
//!
//! Every field except the log path has a default, so a config can be
//! built with `StoreConfig::new(path)` and adjusted with the `with_*`
//! methods, or deserialized from JSON with only the fields that differ.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CachePolicy;
use crate::commit::RetryPolicy;
use crate::index::snapshot_path;

/// Configuration for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Log file path
    pub path: PathBuf,
    /// Values at least this many bytes long are never cached
    pub cache_limit: usize,
    /// Maximum cached documents; zero disables the cache
    pub cache_size: usize,
    /// Cache capacity policy
    pub cache_policy: CachePolicy,
    /// Cache small documents while loading
    pub warm_cache: bool,
    /// Persist the catalog snapshot on close
    pub save_index: bool,
    /// Maximum append attempts per flush
    pub write_retries: u32,
    /// Pause between append attempts
    pub retry_delay: Duration,
    /// fsync after every flush
    pub sync_on_commit: bool,
    /// Indent dumps with two spaces
    pub pretty_dump: bool,
    /// Buffered events per subscriber
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            cache_limit: 1024,
            cache_size: 1024,
            cache_policy: CachePolicy::default(),
            warm_cache: true,
            save_index: false,
            write_retries: 5,
            retry_delay: Duration::from_millis(50),
            sync_on_commit: false,
            pretty_dump: false,
            event_capacity: 256,
        }
    }
}

impl StoreConfig {
    /// Default configuration for the log at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_cache_limit(mut self, bytes: usize) -> Self {
        self.cache_limit = bytes;
        self
    }

    pub fn with_cache_size(mut self, entries: usize) -> Self {
        self.cache_size = entries;
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_warm_cache(mut self, warm: bool) -> Self {
        self.warm_cache = warm;
        self
    }

    pub fn with_save_index(mut self, save: bool) -> Self {
        self.save_index = save;
        self
    }

    pub fn with_write_retries(mut self, attempts: u32) -> Self {
        self.write_retries = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    pub fn with_pretty_dump(mut self, pretty: bool) -> Self {
        self.pretty_dump = pretty;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Catalog snapshot path: `<path>.index`
    pub fn index_path(&self) -> PathBuf {
        snapshot_path(&self.path)
    }

    /// Dump path: `<path>.json`
    pub fn dump_path(&self) -> PathBuf {
        with_suffix(&self.path, ".json")
    }

    /// Compaction scratch path: `<path>~`
    pub fn scratch_path(&self) -> PathBuf {
        with_suffix(&self.path, "~")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.write_retries.max(1),
            delay: self.retry_delay,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::new("/data/users.jot");
        assert_eq!(config.cache_limit, 1024);
        assert_eq!(config.cache_size, 1024);
        assert_eq!(
            config.cache_policy,
            CachePolicy::Lru {
                ttl: Duration::from_secs(120)
            }
        );
        assert!(config.warm_cache);
        assert!(!config.save_index);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_derived_paths() {
        let config = StoreConfig::new("/data/users.jot");
        assert_eq!(config.index_path(), PathBuf::from("/data/users.jot.index"));
        assert_eq!(config.dump_path(), PathBuf::from("/data/users.jot.json"));
        assert_eq!(config.scratch_path(), PathBuf::from("/data/users.jot~"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"path": "a.jot", "cache_policy": "fifo", "save_index": true}"#)
                .unwrap();
        assert_eq!(config.path, PathBuf::from("a.jot"));
        assert_eq!(config.cache_policy, CachePolicy::Fifo);
        assert!(config.save_index);
        assert_eq!(config.write_retries, 5);
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("a.jot")
            .with_cache_size(0)
            .with_write_retries(0)
            .with_pretty_dump(true);
        assert_eq!(config.cache_size, 0);
        assert_eq!(config.retry_policy().attempts, 1);
        assert!(config.pretty_dump);
    }
}
