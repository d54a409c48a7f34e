//! Broadcast synchronizer
//!
//! Typed publish/subscribe over a [`ChannelTransport`]. Both directions are
//! best-effort: when the transport is missing they quietly do nothing.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::broadcast::{BroadcastEnvelope, ChannelTransport};

#[derive(Clone)]
pub struct BroadcastSync {
    transport: Option<Arc<dyn ChannelTransport>>,
    prefix: String,
}

impl BroadcastSync {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            transport: Some(transport),
            prefix: String::new(),
        }
    }

    /// A synchronizer for a context with no channel support.
    pub fn unavailable() -> Self {
        Self {
            transport: None,
            prefix: String::new(),
        }
    }

    /// Namespaces every channel as `prefix.name`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim().to_string();
        self
    }

    pub fn is_available(&self) -> bool {
        self.transport.is_some()
    }

    pub fn channel_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    // == Publish ==
    /// Opens a channel, sends one envelope and closes it again.
    ///
    /// Returns whether the envelope was handed to the transport.
    pub fn publish(&self, channel: &str, envelope: &BroadcastEnvelope) -> bool {
        let Some(transport) = &self.transport else {
            debug!("Publish '{}' skipped: no transport", envelope.tag());
            return false;
        };
        let name = self.channel_name(channel);
        let result = transport.open(&name).and_then(|mut ch| {
            let sent = envelope.encode().and_then(|payload| ch.send(payload));
            ch.close();
            sent
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("Publish '{}' on '{}' dropped: {}", envelope.tag(), name, e);
                false
            }
        }
    }

    // == Subscribe ==
    /// Keeps a channel open and hands every well-formed envelope to `handler`
    /// until the returned [`Subscription`] is closed or dropped.
    ///
    /// Malformed messages never reach the handler. Needs a tokio runtime; without
    /// one (or without a transport) the subscription is inert.
    pub fn subscribe<F>(&self, channel: &str, mut handler: F) -> Subscription
    where
        F: FnMut(BroadcastEnvelope) + Send + 'static,
    {
        let name = self.channel_name(channel);
        let Some(transport) = &self.transport else {
            debug!("Subscribe to '{}' skipped: no transport", name);
            return Subscription::inactive(name);
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("Subscribe to '{}' skipped: no runtime", name);
            return Subscription::inactive(name);
        };
        // Open before spawning so nothing sent after this call is missed.
        let mut ch = match transport.open(&name) {
            Ok(ch) => ch,
            Err(e) => {
                debug!("Subscribe to '{}' skipped: {}", name, e);
                return Subscription::inactive(name);
            }
        };

        let task_name = name.clone();
        let task = runtime.spawn(async move {
            while let Some(raw) = ch.recv().await {
                match BroadcastEnvelope::decode(raw) {
                    Some(envelope) => handler(envelope),
                    None => debug!("Dropped malformed message on '{}'", task_name),
                }
            }
            ch.close();
        });

        Subscription {
            channel: name,
            task: Some(task),
        }
    }
}

// == Subscription ==
/// Live subscription. Dropping it closes the channel.
pub struct Subscription {
    channel: String,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn inactive(channel: String) -> Self {
        Self {
            channel,
            task: None,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{LocalChannelHub, UnavailableTransport};
    use crate::cache_key;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn collector() -> (Arc<Mutex<Vec<BroadcastEnvelope>>>, impl FnMut(BroadcastEnvelope) + Send) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |env| sink.lock().unwrap().push(env))
    }

    #[tokio::test]
    async fn test_publish_reaches_peer_subscriber() {
        let hub = LocalChannelHub::default();
        let a = BroadcastSync::new(Arc::new(hub.context("a")));
        let b = BroadcastSync::new(Arc::new(hub.context("b")));

        let (seen, handler) = collector();
        let sub = b.subscribe("sync", handler);
        assert!(sub.is_active());

        let env = BroadcastEnvelope::invalidate(cache_key!["groups"], true);
        assert!(a.publish("sync", &env));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[env]);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let hub = LocalChannelHub::default();
        let b = BroadcastSync::new(Arc::new(hub.context("b")));
        let (seen, handler) = collector();
        let _sub = b.subscribe("sync", handler);

        let raw = hub.context("a").open("sync").unwrap();
        raw.send(json!({ "type": "unknown", "payload": {} })).unwrap();
        raw.send(json!("garbage")).unwrap();
        raw.send(json!({ "type": "invalidate", "payload": { "key": ["groups"], "exact": true } }))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tag(), "invalidate");
    }

    #[tokio::test]
    async fn test_prefix_namespaces_channels() {
        let hub = LocalChannelHub::default();
        let a = BroadcastSync::new(Arc::new(hub.context("a"))).with_prefix("tm");
        let b_plain = BroadcastSync::new(Arc::new(hub.context("b")));
        let b_prefixed = BroadcastSync::new(Arc::new(hub.context("b"))).with_prefix("tm");
        assert_eq!(a.channel_name("sync"), "tm.sync");

        let (plain_seen, plain) = collector();
        let (prefixed_seen, prefixed) = collector();
        let _s1 = b_plain.subscribe("sync", plain);
        let _s2 = b_prefixed.subscribe("sync", prefixed);

        a.publish("sync", &BroadcastEnvelope::invalidate(cache_key!["groups"], false));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(plain_seen.lock().unwrap().is_empty());
        assert_eq!(prefixed_seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_delivery() {
        let hub = LocalChannelHub::default();
        let a = BroadcastSync::new(Arc::new(hub.context("a")));
        let b = BroadcastSync::new(Arc::new(hub.context("b")));
        let (seen, handler) = collector();

        let sub = b.subscribe("sync", handler);
        sub.close();
        tokio::time::sleep(Duration::from_millis(10)).await;

        a.publish("sync", &BroadcastEnvelope::invalidate(cache_key!["groups"], true));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_transport_is_noop() {
        for sync in [
            BroadcastSync::unavailable(),
            BroadcastSync::new(Arc::new(UnavailableTransport)),
        ] {
            let env = BroadcastEnvelope::invalidate(cache_key!["groups"], true);
            assert!(!sync.publish("sync", &env));
            let sub = sync.subscribe("sync", |_| {});
            assert!(!sub.is_active());
        }
    }

    #[test]
    fn test_subscribe_without_runtime_is_inert() {
        let hub = LocalChannelHub::default();
        let sync = BroadcastSync::new(Arc::new(hub.context("a")));
        let sub = sync.subscribe("sync", |_| {});
        assert!(!sub.is_active());
        assert_eq!(sub.channel(), "sync");
    }
}
