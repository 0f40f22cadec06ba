//! Maps engine and request-validation errors onto HTTP responses, following
//! `hls-vod-server::error`'s `ServerError` + `IntoResponse` pattern.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hls_origin_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("path segment contains a traversal sequence")]
    PathTraversal,

    #[error("unknown path")]
    NotFound,

    #[error("path no longer valid")]
    Gone,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Engine(EngineError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Engine(EngineError::Gone(_)) => StatusCode::GONE,
            ServerError::Engine(EngineError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ServerError::Engine(EngineError::Configuration(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Engine(EngineError::Bind(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Engine(EngineError::Muxer(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Engine(EngineError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Engine(EngineError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::PathTraversal => StatusCode::FORBIDDEN,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Gone => StatusCode::GONE,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

/// Rejects path segments containing `..` or `~`, the only traversal
/// sequences meaningful once the segment has already been taken out of the
/// URL by axum's router (spec §7 "403 Forbidden").
pub fn reject_traversal(segment: &str) -> Result<(), ServerError> {
    if segment.contains("..") || segment.contains('~') {
        Err(ServerError::PathTraversal)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_segments_are_rejected() {
        assert!(reject_traversal("../etc/passwd").is_err());
        assert!(reject_traversal("~root").is_err());
        assert!(reject_traversal("segment_001.m4s").is_ok());
    }
}
