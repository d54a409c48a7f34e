//! Cache Module
//!
//! Data model of the query cache (keys, entries, statistics) and the store
//! contract the rest of the subsystem consumes.

mod entry;
mod key;
mod stats;
mod store;

// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry, QueryStatus, StaleTime};
pub use key::CacheKey;
pub use stats::CacheStats;
pub use store::{CacheEvent, InvalidateScope, MemoryQueryCache, QueryCache};
