//! Storage error types
//!
//! Error codes:
//! - JOT_STORAGE_IO_ERROR (ERROR severity)
//! - JOT_STORAGE_READ_FAILED (ERROR severity)
//! - JOT_STORAGE_WRITE_FAILED (FATAL severity)
//! - JOT_STORAGE_TRANSIENT (ERROR severity, retryable)
//! - JOT_DATA_CORRUPTION (ERROR severity, recovered by slot fallback)
//! - JOT_DATA_NON_RECOVERABLE (ERROR severity, key dropped from the catalog)

use std::fmt;
use std::io;

/// Severity levels for storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, store continues
    Error,
    /// Pending writes are terminated
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Storage-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// Opening, syncing or renaming the log failed
    JotStorageIoError,
    /// A positional read failed
    JotStorageReadFailed,
    /// An append failed permanently
    JotStorageWriteFailed,
    /// An append failed in a way that may succeed on retry
    JotStorageTransient,
    /// A slot failed its shape check or its bytes do not decode
    JotDataCorruption,
    /// A slot failed its shape check and no earlier version survives
    JotDataNonRecoverable,
}

impl StorageErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::JotStorageIoError => "JOT_STORAGE_IO_ERROR",
            StorageErrorCode::JotStorageReadFailed => "JOT_STORAGE_READ_FAILED",
            StorageErrorCode::JotStorageWriteFailed => "JOT_STORAGE_WRITE_FAILED",
            StorageErrorCode::JotStorageTransient => "JOT_STORAGE_TRANSIENT",
            StorageErrorCode::JotDataCorruption => "JOT_DATA_CORRUPTION",
            StorageErrorCode::JotDataNonRecoverable => "JOT_DATA_NON_RECOVERABLE",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StorageErrorCode::JotStorageWriteFailed => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Storage error type with context
#[derive(Debug)]
pub struct StorageError {
    /// Error code
    code: StorageErrorCode,
    /// Human-readable message
    message: String,
    /// Optional details about the error context
    details: Option<String>,
    /// Underlying IO error if applicable
    source: Option<io::Error>,
}

impl StorageError {
    fn with_source(code: StorageErrorCode, message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    fn at_offset(code: StorageErrorCode, message: String, offset: u64) -> Self {
        Self {
            code,
            message,
            details: Some(format!("byte_offset: {}", offset)),
            source: None,
        }
    }

    /// Opening, syncing, renaming or removing a file failed
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self::with_source(StorageErrorCode::JotStorageIoError, message, source)
    }

    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::with_source(StorageErrorCode::JotStorageReadFailed, message, source)
    }

    /// Append failed for good; pending writes fail with it
    pub fn write_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::with_source(StorageErrorCode::JotStorageWriteFailed, message, source)
    }

    pub fn transient(message: impl Into<String>, source: io::Error) -> Self {
        Self::with_source(StorageErrorCode::JotStorageTransient, message, source)
    }

    /// Slot at `offset` failed its shape check
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self::at_offset(StorageErrorCode::JotDataCorruption, reason.into(), offset)
    }

    /// Every version of `key` failed; `offset` is the oldest one tried
    pub fn non_recoverable(key: &str, offset: u64) -> Self {
        Self::at_offset(
            StorageErrorCode::JotDataNonRecoverable,
            format!("{} corrupt, no earlier version to fall back to", key),
            offset,
        )
    }

    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns the underlying I/O error kind, if any
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        self.source.as_ref().map(|e| e.kind())
    }

    /// Whether the failed operation may be retried
    pub fn is_transient(&self) -> bool {
        self.code == StorageErrorCode::JotStorageTransient
    }

    /// Whether this error terminates pending writes
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Whether this error reports damaged log bytes
    pub fn is_corruption(&self) -> bool {
        matches!(
            self.code,
            StorageErrorCode::JotDataCorruption | StorageErrorCode::JotDataNonRecoverable
        )
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
