//! Channel transports
//!
//! Capability interface over an ephemeral, best-effort channel between
//! execution contexts, and an in-process hub implementation on top of
//! `tokio::sync::broadcast`.
//!
//! A context never receives messages it sent itself. Messages from one sender
//! reach a given receiver in send order; nothing is guaranteed across senders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::error::{Result, SyncError};

/// Default per-channel buffer of the in-process hub.
pub const DEFAULT_HUB_CAPACITY: usize = 64;

/// One open channel.
#[async_trait]
pub trait PubSubChannel: Send {
    fn name(&self) -> &str;

    fn send(&self, payload: serde_json::Value) -> Result<()>;

    /// Next message from a peer context; `None` once the channel is closed.
    async fn recv(&mut self) -> Option<serde_json::Value>;

    fn close(&mut self);
}

/// Opens channels by name.
pub trait ChannelTransport: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn PubSubChannel>>;
}

// == Unavailable Transport ==
/// Transport of a context without channel support. Every open fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTransport;

impl ChannelTransport for UnavailableTransport {
    fn open(&self, name: &str) -> Result<Box<dyn PubSubChannel>> {
        Err(SyncError::TransportUnavailable(format!(
            "no channel support for '{}'",
            name
        )))
    }
}

// == Local Channel Hub ==
#[derive(Debug, Clone)]
struct Frame {
    origin: String,
    payload: serde_json::Value,
}

/// In-process hub shared by several execution contexts.
#[derive(Clone)]
pub struct LocalChannelHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Frame>>>>,
    capacity: usize,
}

impl LocalChannelHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Transport for one execution context.
    pub fn context(&self, id: impl Into<String>) -> HubTransport {
        HubTransport {
            hub: self.clone(),
            context: id.into(),
        }
    }

    fn sender(&self, name: &str) -> broadcast::Sender<Frame> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Forgets a channel nobody is receiving on any more.
    fn prune(&self, name: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels.get(name).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(name);
        }
    }

    /// Number of named channels currently held by the hub.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for LocalChannelHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

/// A context's view of a [`LocalChannelHub`].
#[derive(Clone)]
pub struct HubTransport {
    hub: LocalChannelHub,
    context: String,
}

impl HubTransport {
    pub fn context_id(&self) -> &str {
        &self.context
    }
}

impl ChannelTransport for HubTransport {
    fn open(&self, name: &str) -> Result<Box<dyn PubSubChannel>> {
        let tx = self.hub.sender(name);
        let rx = tx.subscribe();
        Ok(Box::new(HubChannel {
            hub: self.hub.clone(),
            name: name.to_string(),
            context: self.context.clone(),
            tx: Some(tx),
            rx: Some(rx),
        }))
    }
}

struct HubChannel {
    hub: LocalChannelHub,
    name: String,
    context: String,
    tx: Option<broadcast::Sender<Frame>>,
    rx: Option<broadcast::Receiver<Frame>>,
}

#[async_trait]
impl PubSubChannel for HubChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, payload: serde_json::Value) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| SyncError::ChannelClosed(self.name.clone()))?;
        // An error only means nobody is listening right now.
        let _ = tx.send(Frame {
            origin: self.context.clone(),
            payload,
        });
        Ok(())
    }

    async fn recv(&mut self) -> Option<serde_json::Value> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(frame) if frame.origin == self.context => continue,
                Ok(frame) => return Some(frame.payload),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Channel '{}' lagged, {} messages skipped", self.name, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn close(&mut self) {
        self.tx = None;
        if self.rx.take().is_some() {
            self.hub.prune(&self.name);
        }
    }
}

impl Drop for HubChannel {
    fn drop(&mut self) {
        self.close();
    }
}
