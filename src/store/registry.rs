//! Registry of open stores
//!
//! Hands out one `Store` per log file. Paths are canonicalized, so two
//! spellings of the same file share a handle. The registry is an ordinary
//! value owned by the caller; dropping it does not close its stores.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::config::StoreConfig;
use super::errors::{StoreError, StoreResult};
use super::Store;
use crate::storage::StorageError;

/// Open stores keyed by canonical log path.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: Mutex<HashMap<PathBuf, Store>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the open store for `config.path`, opening it if needed.
    /// An existing handle keeps the configuration it was opened with.
    pub fn open(&self, config: StoreConfig) -> StoreResult<Store> {
        let canonical = canonical_path(&config.path)?;
        let mut stores = self.stores();
        if let Some(store) = stores.get(&canonical) {
            if !store.is_closed() {
                return Ok(store.clone());
            }
        }

        let store = Store::open_with(StoreConfig {
            path: canonical.clone(),
            ..config
        })?;
        debug!(path = %canonical.display(), "store registered");
        stores.insert(canonical, store.clone());
        Ok(store)
    }

    /// The open store for `path`, if any.
    pub fn get(&self, path: &Path) -> Option<Store> {
        let canonical = canonical_path(path).ok()?;
        self.stores()
            .get(&canonical)
            .filter(|store| !store.is_closed())
            .cloned()
    }

    /// Closes and forgets the store for `path`.
    pub async fn close(&self, path: &Path) -> StoreResult<()> {
        let canonical = canonical_path(path)?;
        let store = self
            .stores()
            .remove(&canonical)
            .ok_or_else(|| StoreError::NotFound(canonical.display().to_string()))?;
        store.close().await
    }

    /// Closes every store. Returns the first failure, after trying all.
    pub async fn close_all(&self) -> StoreResult<()> {
        let stores: Vec<Store> = self.stores().drain().map(|(_, store)| store).collect();
        let mut first_error = None;
        for store in stores {
            match store.close().await {
                Ok(()) | Err(StoreError::Closed) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Paths of registered stores.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.stores().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.stores().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores().is_empty()
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<PathBuf, Store>> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Canonicalizes the parent directory and keeps the file name, so paths
/// of logs that do not exist yet still resolve.
fn canonical_path(path: &Path) -> StoreResult<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| StoreError::BadValue(format!("{} has no file name", path.display())))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| {
        StorageError::io_error(format!("Failed to create {}", parent.display()), e)
    })?;
    let parent = parent.canonicalize().map_err(|e| {
        StorageError::io_error(format!("Failed to resolve {}", parent.display()), e)
    })?;
    Ok(parent.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_same_path_shares_handle() {
        let dir = TempDir::new().unwrap();
        let registry = StoreRegistry::new();
        let plain = dir.path().join("a.jot");
        let dotted = dir.path().join(".").join("a.jot");

        let first = registry.open(StoreConfig::new(&plain)).unwrap();
        first.set("k", json!({"v": 1})).await.unwrap();
        let second = registry.open(StoreConfig::new(&dotted)).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(second.get("k").await.unwrap()["v"], 1);
        assert!(registry.get(&plain).is_some());
    }

    #[tokio::test]
    async fn test_close_removes_entry() {
        let dir = TempDir::new().unwrap();
        let registry = StoreRegistry::new();
        let path = dir.path().join("a.jot");

        let store = registry.open(StoreConfig::new(&path)).unwrap();
        store.ready().await.unwrap();
        registry.close(&path).await.unwrap();

        assert!(registry.is_empty());
        assert!(store.is_closed());
        assert!(registry.get(&path).is_none());
        assert!(matches!(
            registry.close(&path).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_all() {
        let dir = TempDir::new().unwrap();
        let registry = StoreRegistry::new();
        let a = registry.open(StoreConfig::new(dir.path().join("a.jot"))).unwrap();
        let b = registry.open(StoreConfig::new(dir.path().join("b.jot"))).unwrap();

        registry.close_all().await.unwrap();

        assert!(a.is_closed() && b.is_closed());
        assert!(registry.is_empty());
    }
}
