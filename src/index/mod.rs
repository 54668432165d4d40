//! Key catalog for jotdb
//!
//! The catalog is derived state rebuilt from the log on open, optionally
//! seeded from a persisted snapshot.
//!
//! # Invariants
//!
//! - Every catalogued slot passed its shape check
//! - Entries change only after the record they point at is durable
//! - Removed keys are absent, not marked

mod catalog;
mod loader;
mod snapshot;

pub use catalog::IndexCatalog;
pub use loader::{load_index, warm_cache, LoadReport, LoadedIndex};
pub use snapshot::{snapshot_path, IndexSnapshot, SnapshotUse};
