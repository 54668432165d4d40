//! # Store Errors
//!
//! Caller-facing error kinds. A query that matches nothing is not an
//! error; see `FetchOutcome::NoRecords`.

use thiserror::Error;

use crate::document::DecodeError;
use crate::query::QueryError;
use crate::storage::StorageError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    // ==================
    // Rejected Input
    // ==================
    /// Key is empty or contains a reserved byte
    #[error("Bad key {0:?}: keys must be non-empty and free of tab, line feed and 0x1F")]
    BadKey(String),

    /// Value cannot be stored
    #[error("Bad value: {0}")]
    BadValue(String),

    // ==================
    // Lookup
    // ==================
    /// Key unindexed or removed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Update or remove on a key that does not exist
    #[error("No such key: {0}")]
    NoSuchKey(String),

    // ==================
    // Data
    // ==================
    /// Stored bytes failed an integrity check
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Stored bytes are not a document
    #[error("Cannot decode {key}: {message}")]
    Decode { key: String, message: String },

    // ==================
    // I/O
    // ==================
    /// Retryable I/O failure
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// Non-retryable I/O failure, or retries exhausted
    #[error("Fatal I/O failure: {0}")]
    FatalIo(String),

    // ==================
    // Other
    // ==================
    /// Predicate rejected
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Store closed or its engine stopped
    #[error("Store is closed")]
    Closed,
}

impl StoreError {
    pub(crate) fn decode(key: &str, err: DecodeError) -> Self {
        StoreError::Decode {
            key: key.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::TransientIo(_))
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        if err.is_corruption() {
            StoreError::Corrupt(err.to_string())
        } else if err.is_transient() {
            StoreError::TransientIo(err.to_string())
        } else {
            StoreError::FatalIo(err.to_string())
        }
    }
}
