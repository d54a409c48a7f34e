//! Cache Persister
//!
//! Dehydrates an allow-listed subset of the cache into a snapshot, writes it
//! to a [`DurableStore`] and restores it at startup. Every durable failure is
//! logged and swallowed: persistence only ever saves a refetch.
//!
//! Snapshot layout:
//! `{ buster, savedAt, entries: [{ key, keyHash, state }] }` where `state` is
//! `{ status, fetchStatus, data?, error, dataUpdatedAt, isInvalidated, promise? }`.
//! `data` is only written when the entry holds data, so a stored `null` is kept.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{current_timestamp_ms, CacheEntry, CacheKey, QueryCache, QueryStatus};
use crate::persist::{sanitize, DurableStore};
use crate::value::Value;

// == Snapshot ==
#[derive(Debug, Clone)]
pub struct PersistedEntry {
    pub key: CacheKey,
    pub key_hash: String,
    pub state: Value,
}

impl PersistedEntry {
    /// Captures one cache entry, in-flight placeholder included.
    pub fn from_cache_entry(entry: &CacheEntry) -> Self {
        let mut fields = vec![
            ("status", Value::string(entry.status.as_str())),
            (
                "fetchStatus",
                Value::string(if entry.is_fetching() { "fetching" } else { "idle" }),
            ),
            (
                "error",
                entry.error.clone().map(Value::String).unwrap_or(Value::Null),
            ),
            ("dataUpdatedAt", Value::from(entry.data_updated_at)),
            ("isInvalidated", Value::Bool(entry.is_invalidated)),
        ];
        // An absent field means "no data"; a stored null is real data.
        if let Some(data) = &entry.data {
            fields.push(("data", data.clone()));
        }
        if let Some(op) = &entry.in_flight {
            fields.push(("promise", Value::Pending(op.clone())));
        }
        Self {
            key: entry.key.clone(),
            key_hash: entry.key.canonical(),
            state: Value::object(fields),
        }
    }

    fn to_value(&self) -> Value {
        Value::object([
            ("key", Value::from(serde_json::Value::from(self.key.parts().to_vec()))),
            ("keyHash", Value::string(self.key_hash.clone())),
            ("state", self.state.clone()),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let key_json = value.get("key")?.to_json().ok()?;
        let key: CacheKey = serde_json::from_value(key_json).ok()?;
        let state = value.get("state")?;
        if !matches!(state, Value::Object(_)) {
            return None;
        }
        let key_hash = value
            .get("keyHash")
            .and_then(|h| h.as_str().map(str::to_string))
            .unwrap_or_else(|| key.canonical());
        Some(Self {
            key,
            key_hash,
            state,
        })
    }

    pub fn data_updated_at(&self) -> u64 {
        self.state
            .get("dataUpdatedAt")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// Rebuilds a cache entry. A fetch cannot survive a restart, so a
    /// "fetching" status comes back as success (with data) or idle.
    pub fn to_cache_entry(&self, gc_time_ms: u64) -> CacheEntry {
        let mut entry = CacheEntry::new(self.key.clone(), gc_time_ms);
        entry.data = self.state.get("data");
        entry.error = self
            .state
            .get("error")
            .and_then(|e| e.as_str().map(str::to_string));
        entry.data_updated_at = self.data_updated_at();
        entry.is_invalidated = self
            .state
            .get("isInvalidated")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let status = self
            .state
            .get("status")
            .and_then(|s| s.as_str().and_then(QueryStatus::parse))
            .unwrap_or(QueryStatus::Idle);
        entry.status = match status {
            QueryStatus::Fetching if entry.has_data() => QueryStatus::Success,
            QueryStatus::Fetching => QueryStatus::Idle,
            other => other,
        };
        entry
    }
}

#[derive(Debug, Clone)]
pub struct PersistedSnapshot {
    pub buster: String,
    pub saved_at: u64,
    pub entries: Vec<PersistedEntry>,
}

impl PersistedSnapshot {
    pub fn to_value(&self) -> Value {
        Value::object([
            ("buster", Value::string(self.buster.clone())),
            ("savedAt", Value::from(self.saved_at)),
            (
                "entries",
                Value::array(self.entries.iter().map(PersistedEntry::to_value)),
            ),
        ])
    }

    /// Reads a snapshot back. Malformed entries are skipped; a malformed
    /// envelope yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let buster = value.get("buster")?.as_str()?.to_string();
        let saved_at = value.get("savedAt")?.as_u64()?;
        let entries = value
            .get("entries")?
            .items()?
            .iter()
            .filter_map(PersistedEntry::from_value)
            .collect();
        Some(Self {
            buster,
            saved_at,
            entries,
        })
    }
}

/// Drops the in-flight placeholder of a restored entry. Builds a new state
/// object so a value still held by the durable store is never mutated.
fn repair_state(state: &Value) -> Option<Value> {
    let Value::Object(fields) = state else {
        return None;
    };
    let fetching = state.get("fetchStatus").and_then(|s| s.as_str().map(|s| s == "fetching"));
    if state.get("promise").is_none() && fetching != Some(true) {
        return None;
    }
    let repaired: Vec<(String, Value)> = fields
        .read()
        .iter()
        .filter(|(k, _)| k != "promise")
        .map(|(k, v)| match k.as_str() {
            "fetchStatus" => (k.clone(), Value::string("idle")),
            _ => (k.clone(), v.clone()),
        })
        .collect();
    Some(Value::object(repaired))
}

// == Persister ==
pub struct Persister {
    store: Arc<dyn DurableStore>,
    key: String,
    allow_prefixes: Vec<String>,
    max_age_ms: u64,
    buster: String,
}

impl Persister {
    pub fn new(store: Arc<dyn DurableStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            allow_prefixes: Vec::new(),
            max_age_ms: 24 * 60 * 60 * 1000,
            buster: String::new(),
        }
    }

    pub fn from_config(store: Arc<dyn DurableStore>, config: &crate::config::Config) -> Self {
        Self::new(store, config.persist_key.clone())
            .with_allow_prefixes(config.persist_allow_prefixes.clone())
            .with_max_age_ms(config.persist_max_age_ms)
            .with_buster(config.persist_buster.clone())
    }

    pub fn with_allow_prefixes(mut self, prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allow_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_age_ms(mut self, max_age_ms: u64) -> Self {
        self.max_age_ms = max_age_ms;
        self
    }

    pub fn with_buster(mut self, buster: impl Into<String>) -> Self {
        self.buster = buster.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    // == Filter ==
    /// Only successful entries under an allow-listed first key part are written.
    pub fn should_persist_query(&self, entry: &CacheEntry) -> bool {
        entry.status == QueryStatus::Success
            && entry
                .key
                .root()
                .is_some_and(|root| self.allow_prefixes.iter().any(|p| p == root))
    }

    pub fn dehydrate<C: QueryCache + ?Sized>(&self, cache: &C) -> PersistedSnapshot {
        let mut entries: Vec<PersistedEntry> = cache
            .entries()
            .iter()
            .filter(|entry| self.should_persist_query(entry))
            .map(PersistedEntry::from_cache_entry)
            .collect();
        entries.sort_by(|a, b| a.key_hash.cmp(&b.key_hash));
        PersistedSnapshot {
            buster: self.buster.clone(),
            saved_at: current_timestamp_ms(),
            entries,
        }
    }

    // == Persist ==
    /// Sanitizes and writes the snapshot. Returns whether the write succeeded.
    pub async fn persist_client(&self, snapshot: &PersistedSnapshot) -> bool {
        let Some(sanitized) = sanitize(&snapshot.to_value()) else {
            return false;
        };
        match self.store.set(&self.key, sanitized).await {
            Ok(()) => {
                debug!("Persisted {} entries under '{}'", snapshot.entries.len(), self.key);
                true
            }
            Err(e) => {
                warn!("Persist to '{}' skipped: {}", self.key, e);
                false
            }
        }
    }

    pub async fn persist_cache<C: QueryCache + ?Sized>(&self, cache: &C) -> bool {
        let snapshot = self.dehydrate(cache);
        self.persist_client(&snapshot).await
    }

    // == Restore ==
    /// Reads the snapshot back. `None` means a cold start: nothing stored,
    /// unreadable, from another buster, or older than the max age.
    pub async fn restore_client(&self) -> Option<PersistedSnapshot> {
        let raw = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No persisted snapshot under '{}'", self.key);
                return None;
            }
            Err(e) => {
                warn!("Restore from '{}' failed: {}", self.key, e);
                return None;
            }
        };

        // A previous build may have written values that are no longer safe.
        let Some(mut snapshot) = sanitize(&raw).as_ref().and_then(PersistedSnapshot::from_value)
        else {
            warn!("Persisted snapshot under '{}' is malformed, discarding", self.key);
            self.remove_client().await;
            return None;
        };

        if snapshot.buster != self.buster {
            info!(
                "Persisted snapshot buster '{}' does not match '{}', discarding",
                snapshot.buster, self.buster
            );
            self.remove_client().await;
            return None;
        }

        let now = current_timestamp_ms();
        if now.saturating_sub(snapshot.saved_at) > self.max_age_ms {
            info!("Persisted snapshot is older than {} ms, discarding", self.max_age_ms);
            self.remove_client().await;
            return None;
        }

        let before = snapshot.entries.len();
        snapshot
            .entries
            .retain(|entry| now.saturating_sub(entry.data_updated_at()) <= self.max_age_ms);
        if snapshot.entries.len() < before {
            debug!("Dropped {} expired persisted entries", before - snapshot.entries.len());
        }

        for entry in &mut snapshot.entries {
            if let Some(repaired) = repair_state(&entry.state) {
                entry.state = repaired;
            }
        }
        Some(snapshot)
    }

    /// Restores straight into a cache. Returns how many entries were accepted.
    pub async fn restore_into<C: QueryCache + ?Sized>(&self, cache: &C, gc_time_ms: u64) -> usize {
        let Some(snapshot) = self.restore_client().await else {
            return 0;
        };
        let entries = snapshot
            .entries
            .iter()
            .map(|entry| entry.to_cache_entry(gc_time_ms))
            .collect();
        let accepted = cache.hydrate(entries);
        info!("Restored {} of {} persisted entries", accepted, snapshot.entries.len());
        accepted
    }

    pub async fn remove_client(&self) {
        if let Err(e) = self.store.delete(&self.key).await {
            warn!("Removing persisted snapshot '{}' failed: {}", self.key, e);
        }
    }
}
