//! jotdb - An embedded, append-only JSON document store
//!
//! Documents live in a single log file of `key \t json \n` records. An
//! in-memory catalog maps each key to the byte range of its newest value
//! and is rebuilt from the log on open. A bounded cache holds small
//! decoded documents, and predicate queries read through both.
//!
//! ```no_run
//! use jotdb::{FetchOptions, Store};
//! use serde_json::json;
//!
//! # async fn demo() -> jotdb::StoreResult<()> {
//! let store = Store::open("people.jot")?;
//! store.set("ada", json!({"name": "Ada", "age": 36})).await?;
//! let adults = store
//!     .fetch(&json!({"age": {"$gte": 18}}), FetchOptions::new().asc("name"))
//!     .await?;
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod commit;
pub mod document;
pub mod index;
pub mod observability;
pub mod query;
pub mod storage;
pub mod store;

pub use commit::WriteOp;
pub use document::{Document, KEY_PROPERTY};
pub use index::LoadReport;
pub use query::{FetchOptions, FetchOutcome, Filter, QueryError, SortOrder, SortSpec};
pub use store::{
    CompactReport, DocumentStream, ReadOptions, Store, StoreConfig, StoreError, StoreRegistry,
    StoreResult, StreamEntry,
};
