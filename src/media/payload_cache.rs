//! Payload Cache Module
//!
//! Backing cache of fetched media, keyed by request URL, and the pass that
//! keeps it under a maximum entry count.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::media::BinaryPayload;

/// Named request-to-payload cache.
#[async_trait]
pub trait PayloadCache: Send + Sync {
    async fn put(&self, url: &str, payload: BinaryPayload) -> Result<()>;

    async fn lookup(&self, url: &str) -> Result<Option<BinaryPayload>>;

    /// Every stored URL, oldest first.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Returns whether an entry was removed.
    async fn delete(&self, url: &str) -> Result<bool>;
}

// == Insertion Order ==
/// Tracks write order of stored URLs.
///
/// Front = newest write, back = oldest.
#[derive(Debug, Default)]
struct InsertionOrder {
    order: VecDeque<String>,
}

impl InsertionOrder {
    /// Moves (or adds) a URL to the newest position.
    fn touch(&mut self, url: &str) {
        self.remove(url);
        self.order.push_front(url.to_string());
    }

    fn remove(&mut self, url: &str) {
        self.order.retain(|u| u != url);
    }

    fn oldest_first(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

// == Memory Payload Cache ==
#[derive(Debug, Default)]
struct CacheInner {
    payloads: HashMap<String, BinaryPayload>,
    order: InsertionOrder,
}

#[derive(Debug, Default)]
pub struct MemoryPayloadCache {
    inner: RwLock<CacheInner>,
}

impl MemoryPayloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PayloadCache for MemoryPayloadCache {
    async fn put(&self, url: &str, payload: BinaryPayload) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.payloads.insert(url.to_string(), payload);
        inner.order.touch(url);
        Ok(())
    }

    async fn lookup(&self, url: &str) -> Result<Option<BinaryPayload>> {
        Ok(self.inner.read().await.payloads.get(url).cloned())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.order.oldest_first())
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.order.remove(url);
        Ok(inner.payloads.remove(url).is_some())
    }
}

// == Cap Enforcement ==
/// Deletes the oldest entries beyond `max_entries`. Best-effort: failures are
/// logged and skipped. Returns how many entries were deleted.
pub async fn enforce_payload_cap<P: PayloadCache + ?Sized>(cache: &P, max_entries: usize) -> usize {
    let keys = match cache.keys().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!("Payload cap pass skipped, listing failed: {}", e);
            return 0;
        }
    };
    if keys.len() <= max_entries {
        return 0;
    }

    let excess = keys.len() - max_entries;
    let mut deleted = 0;
    for url in keys.iter().take(excess) {
        match cache.delete(url).await {
            Ok(true) => deleted += 1,
            Ok(false) => {}
            Err(e) => warn!("Evicting payload '{}' failed: {}", url, e),
        }
    }
    debug!("Payload cap {}: evicted {} of {} entries", max_entries, deleted, keys.len());
    deleted
}
