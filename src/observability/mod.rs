//! Observability for jotdb
//!
//! - Diagnostic logging goes through `tracing`; installing a subscriber
//!   is up to the embedding application
//! - Typed lifecycle and commit events on a broadcast channel
//! - Atomic counters with a copyable snapshot
//!
//! Observability is read-only: a dropped event or a missing subscriber
//! never changes what the store does.

mod events;
mod metrics;

pub use events::{EventBus, StoreEvent, TimedEvent};
pub use metrics::{MetricsSnapshot, StoreMetrics};
