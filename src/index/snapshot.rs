//! Persisted catalog snapshot
//!
//! Format (`<log>.index`):
//! ```json
//! {
//!   "end_offset": 4096,
//!   "checksum": 2914384227,
//!   "slots": { "users:1": [12, 48, 0] }
//! }
//! ```
//!
//! The snapshot is advisory. A missing, unreadable or mismatching snapshot
//! means a full replay, never a failed open.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::catalog::IndexCatalog;
use crate::storage::{Slot, StorageError, StorageResult};

/// Returns the snapshot path for a log file.
pub fn snapshot_path(log_path: &Path) -> PathBuf {
    let mut name = log_path.as_os_str().to_os_string();
    name.push(".index");
    PathBuf::from(name)
}

/// How a loaded snapshot may be used against the current log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotUse {
    /// The log matches the snapshot exactly
    Seed,
    /// The log grew; replay from `from_offset` after seeding
    SeedAndResume { from_offset: u64 },
    /// The log is shorter than the snapshot claims
    Discard,
}

/// Serialized catalog plus the log end it was taken at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSnapshot {
    /// Log end-of-file when the snapshot was taken
    pub end_offset: u64,
    /// CRC32 over `end_offset` and the slot listing
    pub checksum: u32,
    /// key -> [offset, length, birth]
    pub slots: BTreeMap<String, (u64, u32, u64)>,
}

impl IndexSnapshot {
    /// Captures `catalog` as of `end_offset`.
    pub fn capture(catalog: &IndexCatalog, end_offset: u64) -> Self {
        let slots: BTreeMap<String, (u64, u32, u64)> = catalog
            .iter()
            .map(|(k, s, birth)| (k.to_string(), (s.offset, s.length, birth)))
            .collect();
        let checksum = compute_checksum(end_offset, &slots);
        Self {
            end_offset,
            checksum,
            slots,
        }
    }

    /// Whether the stored checksum matches the contents.
    pub fn is_intact(&self) -> bool {
        self.checksum == compute_checksum(self.end_offset, &self.slots)
    }

    /// Decides how the snapshot relates to a log of `file_len` bytes.
    pub fn usage(&self, file_len: u64) -> SnapshotUse {
        use std::cmp::Ordering;
        match self.end_offset.cmp(&file_len) {
            Ordering::Equal => SnapshotUse::Seed,
            Ordering::Less => SnapshotUse::SeedAndResume {
                from_offset: self.end_offset,
            },
            Ordering::Greater => SnapshotUse::Discard,
        }
    }

    /// Slots in key order, as `(key, slot, birth)`.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Slot, u64)> {
        self.slots
            .iter()
            .map(|(k, (offset, length, birth))| (k.as_str(), Slot::new(*offset, *length), *birth))
    }

    /// Writes the snapshot via a temporary file and rename.
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        let json = serde_json::to_vec(self).map_err(|e| {
            StorageError::io_error(
                "Failed to encode index snapshot",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp).map_err(|e| {
            StorageError::io_error(format!("Failed to create {}", tmp.display()), e)
        })?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::io_error("Failed to write index snapshot", e))?;
        fs::rename(&tmp, path).map_err(|e| {
            StorageError::io_error(format!("Failed to install {}", path.display()), e)
        })?;

        debug!(path = %path.display(), keys = self.slots.len(), "index snapshot saved");
        Ok(())
    }

    /// Loads a snapshot, returning `None` if it is missing or unusable.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index snapshot unreadable");
                return None;
            }
        };

        match serde_json::from_slice::<IndexSnapshot>(&bytes) {
            Ok(snapshot) if snapshot.is_intact() => Some(snapshot),
            Ok(_) => {
                warn!(path = %path.display(), "index snapshot checksum mismatch");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index snapshot malformed");
                None
            }
        }
    }

    /// Removes the snapshot file if present.
    pub fn remove(path: &Path) -> StorageResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io_error(
                format!("Failed to remove {}", path.display()),
                e,
            )),
        }
    }
}

fn compute_checksum(end_offset: u64, slots: &BTreeMap<String, (u64, u32, u64)>) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&end_offset.to_le_bytes());
    for (key, (offset, length, birth)) in slots {
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
        hasher.update(&offset.to_le_bytes());
        hasher.update(&length.to_le_bytes());
        hasher.update(&birth.to_le_bytes());
    }
    hasher.finalize()
}
