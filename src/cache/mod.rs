//! Property cache for jotdb
//!
//! Decoded documents for small values, so that repeated reads skip both
//! the positional read and JSON decoding. Correctness never depends on a
//! hit: every entry is reconstructable from the log.

mod property_cache;

pub use property_cache::{CachePolicy, CacheStats, PropertyCache};
