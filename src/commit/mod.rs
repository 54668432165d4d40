//! Commit pipeline for jotdb
//!
//! Serializes every mutation through one engine task. Pending writes are
//! coalesced into a single positional append; only one append is in
//! flight at a time.
//!
//! # Invariants
//!
//! - Catalog and cache are updated only after an append succeeds
//! - Completions resolve in enqueue order
//! - Retries are bounded by attempt count

mod append;
mod batch;
mod pipeline;

pub use append::{append_all, is_retryable, AppendTarget, RetryPolicy};
pub use batch::{CommitBatch, Completion, PendingWrite};
pub use pipeline::{Readiness, WriteOp};

pub(crate) use pipeline::{Command, CommitPipeline};
