//! Decoded-document cache
//!
//! Holds documents whose encoded value is short enough to be worth keeping
//! decoded. The cache is a pure optimization: any entry may disappear at
//! any time and be re-read from the log through its catalog slot.
//!
//! Two capacity policies:
//! - `Fifo`: once the entry count exceeds capacity, the oldest half of the
//!   entries is dropped in one sweep
//! - `Lru`: least recently used entry is evicted on overflow, and entries
//!   older than the time-to-live are treated as misses

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Capacity policy for the property cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Drop the oldest half when full
    Fifo,
    /// Least recently used with a time-to-live
    Lru { ttl: Duration },
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Lru {
            ttl: Duration::from_secs(120),
        }
    }
}

/// Cache statistics. Passive only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

enum Entries {
    Fifo {
        docs: HashMap<String, Document>,
        order: VecDeque<String>,
    },
    Lru {
        docs: LruCache<String, (Document, Instant)>,
        ttl: Duration,
    },
}

/// Bounded cache of decoded documents keyed by document key.
pub struct PropertyCache {
    entries: Entries,
    /// Largest encoded value length admitted
    value_limit: usize,
    capacity: usize,
    stats: CacheStats,
}

impl PropertyCache {
    /// Creates a cache admitting values shorter than `value_limit` bytes
    /// and holding up to `capacity` entries. A zero capacity disables
    /// caching.
    pub fn new(policy: CachePolicy, value_limit: usize, capacity: usize) -> Self {
        let entries = match policy {
            CachePolicy::Fifo => Entries::Fifo {
                docs: HashMap::new(),
                order: VecDeque::new(),
            },
            CachePolicy::Lru { ttl } => {
                let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
                Entries::Lru {
                    docs: LruCache::new(bound),
                    ttl,
                }
            }
        };
        Self {
            entries,
            value_limit,
            capacity,
            stats: CacheStats::default(),
        }
    }

    /// Whether a value of `encoded_len` bytes may be cached.
    pub fn admits(&self, encoded_len: usize) -> bool {
        self.capacity > 0 && encoded_len < self.value_limit
    }

    /// Looks up `key`, counting a hit or a miss.
    pub fn get(&mut self, key: &str) -> Option<Document> {
        let found = match &mut self.entries {
            Entries::Fifo { docs, .. } => docs.get(key).cloned(),
            Entries::Lru { docs, ttl } => {
                let expired = match docs.get(key) {
                    Some((_, stored_at)) => stored_at.elapsed() > *ttl,
                    None => false,
                };
                if expired {
                    docs.pop(key);
                    self.stats.expired += 1;
                    None
                } else {
                    docs.get(key).map(|(doc, _)| doc.clone())
                }
            }
        };

        if found.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        found
    }

    /// Whether `key` is cached, without touching recency or stats.
    pub fn contains(&self, key: &str) -> bool {
        match &self.entries {
            Entries::Fifo { docs, .. } => docs.contains_key(key),
            Entries::Lru { docs, ttl } => docs
                .peek(key)
                .map_or(false, |(_, stored_at)| stored_at.elapsed() <= *ttl),
        }
    }

    /// Caches `doc` under `key` if its encoded length is admitted.
    /// Otherwise any stale entry for `key` is evicted. Returns whether
    /// the document was cached.
    pub fn set(&mut self, key: &str, doc: Document, encoded_len: usize) -> bool {
        if !self.admits(encoded_len) {
            self.evict(key);
            return false;
        }

        let capacity = self.capacity;
        match &mut self.entries {
            Entries::Fifo { docs, order } => {
                if docs.insert(key.to_string(), doc).is_none() {
                    order.push_back(key.to_string());
                }
                if docs.len() > capacity {
                    let half = docs.len() / 2;
                    for _ in 0..half {
                        match order.pop_front() {
                            Some(oldest) => {
                                docs.remove(&oldest);
                            }
                            None => break,
                        }
                    }
                    self.stats.evictions += half as u64;
                }
            }
            Entries::Lru { docs, .. } => {
                if let Some((evicted, _)) = docs.push(key.to_string(), (doc, Instant::now())) {
                    if evicted != key {
                        self.stats.evictions += 1;
                    }
                }
            }
        }
        true
    }

    /// Drops `key` from the cache.
    pub fn evict(&mut self, key: &str) {
        match &mut self.entries {
            Entries::Fifo { docs, order } => {
                if docs.remove(key).is_some() {
                    order.retain(|k| k != key);
                }
            }
            Entries::Lru { docs, .. } => {
                docs.pop(key);
            }
        }
    }

    /// Drops every entry. Statistics are kept.
    pub fn clear(&mut self) {
        match &mut self.entries {
            Entries::Fifo { docs, order } => {
                docs.clear();
                order.clear();
            }
            Entries::Lru { docs, .. } => docs.clear(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Fifo { docs, .. } => docs.len(),
            Entries::Lru { docs, .. } => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value_limit(&self) -> usize {
        self.value_limit
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
