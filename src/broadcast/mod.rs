//! Broadcast Module
//!
//! Keeps several execution contexts' caches coherent through an ephemeral
//! channel. Delivery is best-effort and unordered across senders; a message is
//! only ever a hint to re-validate locally, never data to trust.

mod channel;
mod envelope;
mod sync;
mod watcher;
mod watermark;

pub use channel::{
    ChannelTransport, HubTransport, LocalChannelHub, PubSubChannel, UnavailableTransport,
    DEFAULT_HUB_CAPACITY,
};
pub use envelope::{BroadcastEnvelope, InvalidatePayload, RefreshedPayload};
pub use sync::{BroadcastSync, Subscription};
pub use watcher::{RefreshWatcher, WatchedGroup, WatcherHandle};
pub use watermark::{AnnounceDecision, BroadcastWatermarks};
