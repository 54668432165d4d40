//! Store lifecycle and commit events
//!
//! Events are explicit and typed. They are published on a broadcast
//! channel after the fact; nothing in the commit path waits on a
//! subscriber.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Observable events of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    // Lifecycle
    /// Load started
    Opening,
    /// Load complete, store serving
    Ready { documents: usize, corrupt: usize },
    /// Store closed
    Closed,

    // Writes
    /// Document written
    Put { key: String },
    /// Document removed
    Del { key: String },
    /// Batch appended
    Batch { size: usize },
    /// Append failed transiently and will be retried
    Retry { attempt: u32 },

    // Integrity
    /// Corrupt record skipped in favour of an earlier version
    Corrupt { key: String, offset: u64 },
    /// Key dropped: no intact version survives
    NonRecoverable { key: String },

    // Maintenance
    /// Log rewritten; sizes in bytes
    Compacted { before: u64, after: u64 },
}

impl StoreEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreEvent::Opening => "STORE_OPENING",
            StoreEvent::Ready { .. } => "STORE_READY",
            StoreEvent::Closed => "STORE_CLOSED",
            StoreEvent::Put { .. } => "DOCUMENT_PUT",
            StoreEvent::Del { .. } => "DOCUMENT_DEL",
            StoreEvent::Batch { .. } => "BATCH_APPENDED",
            StoreEvent::Retry { .. } => "APPEND_RETRY",
            StoreEvent::Corrupt { .. } => "RECORD_CORRUPT",
            StoreEvent::NonRecoverable { .. } => "RECORD_NON_RECOVERABLE",
            StoreEvent::Compacted { .. } => "LOG_COMPACTED",
        }
    }

    /// Whether the event reports lost data.
    pub fn is_error(&self) -> bool {
        matches!(self, StoreEvent::NonRecoverable { .. })
    }
}

impl fmt::Display for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event and the time it was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
    pub at: DateTime<Utc>,
    pub event: StoreEvent,
}

/// Fan-out of store events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TimedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes `event`. Having no subscribers is not an error.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.sender.send(TimedEvent {
            at: Utc::now(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimedEvent> {
        self.sender.subscribe()
    }
}
