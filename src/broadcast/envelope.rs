//! Broadcast envelopes
//!
//! The only structure placed on an inter-context channel:
//! `{"type": "<tag>", "payload": {...}}`. Decoding is a closed sum type, so an
//! unknown tag or a payload of the wrong shape is rejected at the boundary.

use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum BroadcastEnvelope {
    /// A context refreshed a key in the background
    Refreshed(RefreshedPayload),
    /// The original mutator invalidated a key
    Invalidate(InvalidatePayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefreshedPayload {
    /// Logical group the key belongs to, e.g. "groups-list"
    pub group: String,
    pub key: CacheKey,
    pub data_updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InvalidatePayload {
    pub key: CacheKey,
    /// When false every key under this prefix is invalidated
    #[serde(default)]
    pub exact: bool,
}

impl BroadcastEnvelope {
    pub fn refreshed(group: impl Into<String>, key: CacheKey, data_updated_at: u64) -> Self {
        BroadcastEnvelope::Refreshed(RefreshedPayload {
            group: group.into(),
            key,
            data_updated_at,
        })
    }

    pub fn invalidate(key: CacheKey, exact: bool) -> Self {
        BroadcastEnvelope::Invalidate(InvalidatePayload { key, exact })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            BroadcastEnvelope::Refreshed(_) => "refreshed",
            BroadcastEnvelope::Invalidate(_) => "invalidate",
        }
    }

    pub fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decodes a raw channel message; anything malformed yields `None`.
    pub fn decode(raw: serde_json::Value) -> Option<Self> {
        serde_json::from_value(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let env = BroadcastEnvelope::refreshed("groups-list", cache_key!["groups"], 42);
        assert_eq!(
            env.encode().unwrap(),
            json!({
                "type": "refreshed",
                "payload": { "group": "groups-list", "key": ["groups"], "dataUpdatedAt": 42 }
            })
        );
        assert_eq!(env.tag(), "refreshed");
    }

    #[test]
    fn test_decode_valid() {
        let raw = json!({ "type": "invalidate", "payload": { "key": ["groups", 1] } });
        let env = BroadcastEnvelope::decode(raw).unwrap();
        assert_eq!(env, BroadcastEnvelope::invalidate(cache_key!["groups", 1], false));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let cases = [
            json!({ "payload": { "key": ["groups"] } }),
            json!({ "type": "explode", "payload": {} }),
            json!({ "type": "refreshed", "payload": { "key": ["groups"] } }),
            json!({ "type": "refreshed", "payload": {
                "group": "g", "key": ["groups"], "dataUpdatedAt": -1 } }),
            json!({ "type": "invalidate", "payload": { "key": ["groups"], "extra": 1 } }),
            json!("refreshed"),
            json!(null),
        ];
        for raw in cases {
            assert!(BroadcastEnvelope::decode(raw.clone()).is_none(), "accepted {}", raw);
        }
    }
}
