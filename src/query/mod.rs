//! Query subsystem for jotdb
//!
//! Predicates are parsed into closed operator enums before any document
//! is read, so a malformed predicate fails before the scan starts.
//!
//! # Invariants
//!
//! - Result order follows the sort option, else catalog (first-write) order
//! - A query that matches nothing yields `NoRecords`, never an error
//! - Results are identical whether documents come from cache or disk

mod engine;
mod errors;
mod filter;
mod options;
mod result;
mod sorter;

pub use engine::{shape, READ_CONCURRENCY};
pub use errors::{QueryError, QueryResult};
pub use filter::{values_equal, Clause, FieldTest, Filter, Operator};
pub use options::FetchOptions;
pub use result::FetchOutcome;
pub use sorter::{DocumentSorter, SortOrder, SortSpec};

pub(crate) use engine::{resolve_entries, QueryEngine};
