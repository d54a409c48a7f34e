//! Binary payloads
//!
//! Fetched media bytes. Two payloads are the same resource only when they
//! share the same allocation; equal bytes fetched twice are different
//! resources.

use std::fmt;
use std::sync::Arc;

struct PayloadInner {
    bytes: Vec<u8>,
    content_type: String,
}

#[derive(Clone)]
pub struct BinaryPayload(Arc<PayloadInner>);

impl BinaryPayload {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self(Arc::new(PayloadInner {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.0.content_type
    }

    pub fn len(&self) -> usize {
        self.0.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.bytes.is_empty()
    }

    /// Resource identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for BinaryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryPayload")
            .field("content_type", &self.0.content_type)
            .field("len", &self.0.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_by_allocation() {
        let a = BinaryPayload::new(vec![1, 2, 3], "image/png");
        let same = a.clone();
        let equal_bytes = BinaryPayload::new(vec![1, 2, 3], "image/png");

        assert!(a.ptr_eq(&same));
        assert!(!a.ptr_eq(&equal_bytes));
        assert_eq!(a.bytes(), equal_bytes.bytes());
        assert_eq!(a.len(), 3);
        assert_eq!(a.content_type(), "image/png");
    }
}
