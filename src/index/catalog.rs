//! In-memory key → slot catalog
//!
//! Derived state: every entry can be rebuilt by replaying the log. Entries
//! are only inserted after the record they point at is durable, and a
//! removed key is absent rather than marked.
//!
//! Each entry remembers the offset of the record that created it, its
//! birth. Whole-catalog iteration runs in birth order, which is the order
//! keys were first written; overwriting a key keeps its place, removing
//! and re-adding it moves it to the end. Range scans run in key order.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::storage::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    slot: Slot,
    birth: u64,
}

/// Mapping from document key to the slot of its latest value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexCatalog {
    slots: BTreeMap<String, Entry>,
    order: BTreeMap<u64, String>,
}

impl IndexCatalog {
    /// Creates an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog from already-verified entries, each born at its
    /// slot offset.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Slot)>,
    {
        let mut catalog = Self::new();
        for (key, slot) in entries {
            catalog.put(key, slot);
        }
        catalog
    }

    /// Returns the slot for `key`.
    pub fn get(&self, key: &str) -> Option<Slot> {
        self.slots.get(key).map(|entry| entry.slot)
    }

    /// Offset of the record that created `key`.
    pub fn birth(&self, key: &str) -> Option<u64> {
        self.slots.get(key).map(|entry| entry.birth)
    }

    /// Points `key` at `slot`, returning the slot it replaced. A new key
    /// is born at `slot.offset`.
    pub fn put(&mut self, key: impl Into<String>, slot: Slot) -> Option<Slot> {
        let key = key.into();
        if let Some(entry) = self.slots.get_mut(&key) {
            return Some(std::mem::replace(&mut entry.slot, slot));
        }
        self.insert_born(key, slot, slot.offset);
        None
    }

    /// Inserts `key` with an explicit birth offset, replacing any entry.
    pub fn insert_born(&mut self, key: impl Into<String>, slot: Slot, birth: u64) {
        let key = key.into();
        if let Some(old) = self.slots.insert(key.clone(), Entry { slot, birth }) {
            self.order.remove(&old.birth);
        }
        self.order.insert(birth, key);
    }

    /// Removes `key`, returning its last slot.
    pub fn remove(&mut self, key: &str) -> Option<Slot> {
        let entry = self.slots.remove(key)?;
        self.order.remove(&entry.birth);
        Some(entry.slot)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Iterates `(key, slot, birth)` in birth order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Slot, u64)> {
        self.order.values().filter_map(move |key| {
            self.slots
                .get(key)
                .map(|entry| (key.as_str(), entry.slot, entry.birth))
        })
    }

    /// Copies out every entry in birth order so callers can release the
    /// lock before touching the log.
    pub fn entries(&self) -> Vec<(String, Slot)> {
        self.iter()
            .map(|(key, slot, _)| (key.to_string(), slot))
            .collect()
    }

    /// Copies out entries with `start <= key <= end`, in key order. Either
    /// bound may be omitted.
    pub fn range(&self, start: Option<&str>, end: Option<&str>) -> Vec<(String, Slot)> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Vec::new();
            }
        }
        let lower = start.map_or(Bound::Unbounded, Bound::Included);
        let upper = end.map_or(Bound::Unbounded, Bound::Included);
        self.slots
            .range::<str, _>((lower, upper))
            .map(|(k, entry)| (k.clone(), entry.slot))
            .collect()
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
