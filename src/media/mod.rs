//! Media Module
//!
//! Lifecycle of handles for rendered media: reference counting with deferred
//! release, plus a size-capped backing cache of fetched payloads.

mod handles;
mod loader;
mod payload;
mod payload_cache;

pub use handles::{
    HandleLease, HandleRegistry, HandleStats, LocalHandleAllocator, ResourceHandle,
    ResourceHandleAllocator,
};
pub use loader::{FilePayloadFetcher, MediaLoader, PayloadFetcher};
pub use payload::BinaryPayload;
pub use payload_cache::{enforce_payload_cap, MemoryPayloadCache, PayloadCache};
