//! Persistence Module
//!
//! Sanitizes an allow-listed slice of the cache and keeps it in a durable
//! store across restarts.

mod persister;
mod sanitize;
mod store;

pub use persister::{PersistedEntry, PersistedSnapshot, Persister};
pub use sanitize::{sanitize, SanitizeOptions, Sanitizer};
pub use store::{DurableStore, FileDurableStore, MemoryDurableStore};
