//! Cache key identification
//!
//! A key is an ordered list of JSON parts. Equality and hashing go through the
//! canonical compact JSON form, so `["groups", 1]` built twice is the same key.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Builds a [`CacheKey`] from JSON-convertible parts.
///
/// ```
/// use cache_coherence::cache_key;
/// let key = cache_key!["groups", 42, "messages"];
/// assert_eq!(key.canonical(), r#"["groups",42,"messages"]"#);
/// ```
#[macro_export]
macro_rules! cache_key {
    ($($part:expr),* $(,)?) => {
        $crate::cache::CacheKey::new(vec![$($crate::__private::json!($part)),*])
    };
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<serde_json::Value>);

impl CacheKey {
    pub fn new(parts: Vec<serde_json::Value>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[serde_json::Value] {
        &self.0
    }

    /// Canonical serialized form. Object parts serialize with sorted keys.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// First part when it is a string, e.g. `"groups"` for `["groups", 1]`.
    pub fn root(&self) -> Option<&str> {
        self.0.first().and_then(|p| p.as_str())
    }

    /// True when `prefix`'s parts equal this key's leading parts.
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        prefix.0.len() <= self.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.canonical())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_equality_by_canonical_form() {
        let a = CacheKey::new(vec![json!("groups"), json!({"b": 1, "a": 2})]);
        let b = CacheKey::new(vec![json!("groups"), json!({"a": 2, "b": 1})]);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_macro_and_root() {
        let key = cache_key!["dating-profiles", 7];
        assert_eq!(key.root(), Some("dating-profiles"));
        assert_eq!(key.parts().len(), 2);
        assert_eq!(key.to_string(), r#"["dating-profiles",7]"#);
    }

    #[test]
    fn test_starts_with() {
        let key = cache_key!["groups", 1, "messages"];
        assert!(key.starts_with(&cache_key!["groups"]));
        assert!(key.starts_with(&cache_key!["groups", 1]));
        assert!(key.starts_with(&cache_key![]));
        assert!(!key.starts_with(&cache_key!["groups", 2]));
        assert!(!cache_key!["groups"].starts_with(&key));
    }

    #[test]
    fn test_serde_transparent() {
        let key = cache_key!["user-profile", "me"];
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"["user-profile","me"]"#);
        let back: CacheKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
