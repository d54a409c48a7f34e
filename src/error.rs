//! Error types for the coherence subsystem
//!
//! Provides unified error handling using thiserror. Most of these never reach
//! a caller of the four core components: they surface at the capability seams
//! (durable store, channel transport, payload cache, route resolvers) and are
//! caught, logged and degraded at the component boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Sync Error Enum ==
/// Unified error type for the coherence subsystem.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No inter-context channel (or durable store) exists in this context
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Channel was closed while sending or receiving
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Durable store read/write/delete failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure underneath a durable store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A navigation target could not be mapped to a cache key
    #[error("Route resolution failed: {0}")]
    RouteResolution(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::InvalidRequest(_) | SyncError::Serialization(_) => StatusCode::BAD_REQUEST,
            SyncError::RouteResolution(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::TransportUnavailable(_) | SyncError::ChannelClosed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SyncError::Storage(_) | SyncError::Io(_) | SyncError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the coherence subsystem.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let resp = SyncError::InvalidRequest("bad".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = SyncError::NotFound("k".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = SyncError::TransportUnavailable("none".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let sync: SyncError = err.into();
        assert!(matches!(sync, SyncError::Serialization(_)));
    }
}
