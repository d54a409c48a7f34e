//! Media Loader
//!
//! Caller-side glue: find a payload in the backing cache or fetch it, keep the
//! cache under its cap, then take a lease on a handle for it.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::media::{enforce_payload_cap, BinaryPayload, HandleLease, HandleRegistry, PayloadCache};

/// Externally supplied fetch of binary payloads.
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<BinaryPayload>;
}

/// Serves media URLs from a local directory: `/img/a.png` maps to
/// `<root>/img/a.png`.
#[derive(Debug, Clone)]
pub struct FilePayloadFetcher {
    root: PathBuf,
}

impl FilePayloadFetcher {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Only plain path segments are allowed, so a URL cannot leave the root.
    fn resolve(&self, url: &str) -> Result<PathBuf> {
        let relative = Path::new(url.trim_start_matches('/'));
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return Err(SyncError::InvalidRequest(format!("Invalid media URL '{}'", url))),
            }
        }
        if path == self.root {
            return Err(SyncError::InvalidRequest(format!("Invalid media URL '{}'", url)));
        }
        Ok(path)
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl PayloadFetcher for FilePayloadFetcher {
    async fn fetch(&self, url: &str) -> Result<BinaryPayload> {
        let path = self.resolve(url)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!("Fetched {} bytes for '{}'", bytes.len(), url);
                Ok(BinaryPayload::new(bytes, content_type_for(&path)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SyncError::NotFound(url.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct MediaLoader {
    cache: Arc<dyn PayloadCache>,
    fetcher: Arc<dyn PayloadFetcher>,
    registry: HandleRegistry,
    max_entries: usize,
}

impl MediaLoader {
    pub fn new(
        cache: Arc<dyn PayloadCache>,
        fetcher: Arc<dyn PayloadFetcher>,
        registry: HandleRegistry,
        max_entries: usize,
    ) -> Self {
        Self {
            cache,
            fetcher,
            registry,
            max_entries,
        }
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Number of payloads currently retained, `None` when listing fails.
    pub async fn cached_payloads(&self) -> Option<usize> {
        self.cache.keys().await.ok().map(|keys| keys.len())
    }

    /// Resolves `url` to a leased handle. Only the fetch itself can fail; the
    /// backing cache is an optimization and its errors are logged.
    pub async fn load(&self, url: &str) -> Result<HandleLease> {
        self.load_payload(url).await.map(|(_, lease)| lease)
    }

    /// Like [`load`](Self::load), also handing back the payload itself.
    pub async fn load_payload(&self, url: &str) -> Result<(BinaryPayload, HandleLease)> {
        let cached = match self.cache.lookup(url).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Payload cache lookup for '{}' failed: {}", url, e);
                None
            }
        };

        let payload = match cached {
            Some(payload) => {
                debug!("Payload cache hit for '{}'", url);
                payload
            }
            None => {
                let payload = self.fetcher.fetch(url).await?;
                match self.cache.put(url, payload.clone()).await {
                    Ok(()) => {
                        enforce_payload_cap(self.cache.as_ref(), self.max_entries).await;
                    }
                    Err(e) => warn!("Storing payload '{}' failed: {}", url, e),
                }
                payload
            }
        };

        let lease = self.registry.lease(url, &payload);
        Ok((payload, lease))
    }
}
