//! Refresh watcher
//!
//! Glues one context's cache store to the inter-context channel. Local
//! background refreshes of watched groups are announced (deduplicated through
//! the shared [`BroadcastWatermarks`]); peer announcements invalidate the
//! affected key so the store re-validates it against its own source of truth.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::{
    AnnounceDecision, BroadcastEnvelope, BroadcastSync, BroadcastWatermarks, InvalidatePayload,
    RefreshedPayload, Subscription,
};
use crate::cache::{CacheEvent, CacheKey, InvalidateScope, QueryCache};

/// A cache key announced under a logical group name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedGroup {
    pub name: String,
    pub key: CacheKey,
}

pub struct RefreshWatcher<C: QueryCache + ?Sized> {
    cache: Arc<C>,
    sync: BroadcastSync,
    watermarks: Arc<BroadcastWatermarks>,
    channel: String,
    groups: Vec<WatchedGroup>,
}

impl<C: QueryCache + ?Sized + 'static> RefreshWatcher<C> {
    pub fn new(
        cache: Arc<C>,
        sync: BroadcastSync,
        watermarks: Arc<BroadcastWatermarks>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            sync,
            watermarks,
            channel: channel.into(),
            groups: Vec::new(),
        }
    }

    /// Announces refreshes of `key` under the group `name`.
    pub fn watch(mut self, name: impl Into<String>, key: CacheKey) -> Self {
        self.groups.push(WatchedGroup {
            name: name.into(),
            key,
        });
        self
    }

    pub fn groups(&self) -> &[WatchedGroup] {
        &self.groups
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn group_for(&self, key: &CacheKey) -> Option<&WatchedGroup> {
        self.groups.iter().find(|g| &g.key == key)
    }

    // == Local Refresh ==
    /// Called after a successful refresh in this context. Returns true when a
    /// "refreshed" envelope was published.
    pub fn on_local_refresh(&self, key: &CacheKey, data_updated_at: u64) -> bool {
        let Some(group) = self.group_for(key) else {
            return false;
        };
        match self.watermarks.on_local_refresh(&group.name, data_updated_at) {
            AnnounceDecision::Announce => {
                let envelope =
                    BroadcastEnvelope::refreshed(group.name.clone(), key.clone(), data_updated_at);
                self.sync.publish(&self.channel, &envelope)
            }
            AnnounceDecision::Duplicate => {
                debug!("Refresh of '{}' at {} already announced", group.name, data_updated_at);
                false
            }
            AnnounceDecision::Absorbed => {
                debug!("Refresh of '{}' was triggered by a peer, not echoing", group.name);
                false
            }
        }
    }

    // == Peer Envelopes ==
    pub fn handle_envelope(&self, envelope: BroadcastEnvelope) {
        match envelope {
            BroadcastEnvelope::Refreshed(payload) => self.on_peer_refreshed(payload),
            BroadcastEnvelope::Invalidate(InvalidatePayload { key, exact }) => {
                let marked = self.cache.invalidate(&key, InvalidateScope::from_exact(exact));
                debug!("Peer invalidated {} (exact={}), {} entries marked", key, exact, marked);
            }
        }
    }

    fn on_peer_refreshed(&self, payload: RefreshedPayload) {
        let RefreshedPayload {
            group,
            key,
            data_updated_at,
        } = payload;
        let older = self
            .cache
            .get_entry(&key)
            .map(|entry| entry.data_updated_at < data_updated_at);

        // Only an existing, older entry is re-validated here; a missing one is
        // fetched on its next read anyway.
        let revalidating = older == Some(true);
        self.watermarks
            .on_peer_refresh(&group, data_updated_at, revalidating);
        if revalidating {
            self.cache.invalidate(&key, InvalidateScope::Exact);
            debug!("Peer refreshed '{}', re-validating {}", group, key);
        }
    }

    // == Invalidation ==
    /// Invalidates locally and tells peers to do the same. Only the context
    /// performing the mutation should call this.
    pub fn invalidate(&self, key: &CacheKey, exact: bool) -> usize {
        let marked = self.cache.invalidate(key, InvalidateScope::from_exact(exact));
        let envelope = BroadcastEnvelope::invalidate(key.clone(), exact);
        self.sync.publish(&self.channel, &envelope);
        marked
    }

    // == Spawn ==
    /// Starts listening to both the cache store and the channel.
    pub fn spawn(self: Arc<Self>) -> WatcherHandle {
        let listener = self.clone();
        let subscription = self
            .sync
            .subscribe(&self.channel, move |env| listener.handle_envelope(env));

        let mut events = self.cache.subscribe();
        let watcher = self;
        let task = tokio::spawn(async move {
            info!(
                "Refresh watcher started on '{}' for {} groups",
                watcher.channel,
                watcher.groups.len()
            );
            loop {
                match events.recv().await {
                    Ok(CacheEvent::Updated {
                        key,
                        data_updated_at,
                    }) => {
                        watcher.on_local_refresh(&key, data_updated_at);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Refresh watcher lagged, {} cache events skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        WatcherHandle {
            subscription: Some(subscription),
            task,
        }
    }
}

/// Running watcher. Dropping it stops both listeners.
pub struct WatcherHandle {
    subscription: Option<Subscription>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }

    /// Stops listening to the cache and closes the channel subscription.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.task.abort();
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
