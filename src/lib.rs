//! Cache Coherence - client-side cache consistency and resource lifecycle
//!
//! Decides whether cached data is still usable, keeps caches of several
//! execution contexts coherent, persists a safe subset across restarts and
//! manages the lifecycle of media handles.

pub mod api;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod error;
pub mod freshness;
pub mod media;
pub mod models;
pub mod persist;
pub mod tasks;
pub mod value;

#[cfg(test)]
mod property_tests;

pub use api::AppState;
pub use config::Config;
pub use error::{Result, SyncError};
pub use tasks::{spawn_gc_task, spawn_persist_task};

#[doc(hidden)]
pub mod __private {
    pub use serde_json::json;
}
