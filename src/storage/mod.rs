//! Log storage for jotdb
//!
//! A store is one append-only file of `key \t json \n` records. The newest
//! record for a key wins; removal appends a tombstone.
//!
//! # Design Principles
//!
//! - Append-only (no in-place updates)
//! - Positional reads bounded by the known end-of-file
//! - Best-effort parsing: damaged bytes are skipped, never fatal
//! - Shape checks at load with fallback to earlier versions

mod errors;
mod log_store;
mod parser;
mod record;
mod verifier;

pub use errors::{Severity, StorageError, StorageErrorCode, StorageResult};
pub use log_store::LogStore;
#[cfg(test)]
pub(crate) use log_store::WriteFault;
pub use parser::{ParseSummary, RecordParser};
pub use record::{
    is_tombstone_value, is_valid_key, LogRecord, Slot, LINE_FEED, PROPERTY_SEPARATOR, TAB,
    TOMBSTONE,
};
pub use verifier::{IntegrityVerifier, Verified};
