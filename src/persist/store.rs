//! Durable Store Module
//!
//! Capability interface over an asynchronous key-value store that survives a
//! restart, plus an in-memory and a file-backed implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::value::Value;

/// Asynchronous durable key-value store. Every call may fail.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

// == Memory Store ==
/// Keeps values as-is, like a structured-clone store. Nothing stops a caller
/// from writing a value that still holds callables; restore copes with that.
#[derive(Default)]
pub struct MemoryDurableStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

// == File Store ==
/// One JSON document per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileDurableStore {
    dir: PathBuf,
}

impl FileDurableStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(SyncError::InvalidRequest(format!(
                "durable key '{}' is not a safe file name",
                key
            )));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl DurableStore for FileDurableStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let json: serde_json::Value = serde_json::from_slice(&raw)?;
        Ok(Some(Value::from(json)))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path_for(key)?;
        let encoded = serde_json::to_vec(&value.to_json()?)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write to a sibling file first so a crash never leaves half a document.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &encoded).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Durable store wrote {} bytes to {}", encoded.len(), path.display());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
