//! Relay error taxonomy.
//!
//! Every failure the tunnel can surface maps to exactly one variant, and each
//! variant maps to the HTTP status the gateway answers with.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors produced anywhere along the tunnel.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// No registry entry for the requested host.
    #[error("no wormhole client listening for {host}")]
    NoClientListening { host: String },

    /// The relay WebSocket could not be signed or opened, or it closed.
    #[error("websocket connection unavailable: {0}")]
    WebSocketUnavailable(String),

    /// No correlated response arrived within the response window.
    #[error("timed out waiting for wormhole client response")]
    ResponseTimeout { req_id: String },

    /// The client's call to its local server failed.
    #[error("local request failed: {0}")]
    UpstreamFetch(String),

    /// A frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A streamed body went past the WebSocket size guard.
    #[error("body exceeded the websocket size guard of {limit} bytes")]
    Overflow { limit: usize },

    /// A message was posted to a connection id that no longer exists.
    #[error("connection {connection_id} is gone")]
    StaleConnection { connection_id: String },

    /// Another client already claimed the host.
    #[error("host {host} already has a listening client ({connection_id})")]
    HostClaimed { host: String, connection_id: String },

    /// Blob store I/O failed.
    #[error("blob store error: {0}")]
    Blob(String),

    /// Blob key does not exist.
    #[error("blob {0} not found")]
    BlobNotFound(String),

    /// Connection registry failed.
    #[error("registry error: {0}")]
    Registry(String),

    /// Missing or invalid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Inbound request body exceeded the listener limit.
    #[error("request body too large")]
    PayloadTooLarge,
}

/// Result alias used across the crate.
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// HTTP status the gateway answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::NoClientListening { .. } => StatusCode::PRECONDITION_FAILED,
            RelayError::WebSocketUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::ResponseTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            RelayError::UpstreamFetch(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::MalformedFrame(_) => StatusCode::BAD_REQUEST,
            RelayError::Overflow { .. } | RelayError::PayloadTooLarge => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            RelayError::StaleConnection { .. } => StatusCode::GONE,
            RelayError::HostClaimed { .. } => StatusCode::CONFLICT,
            RelayError::Blob(_) => StatusCode::BAD_GATEWAY,
            RelayError::BlobNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Blob(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_gateway_statuses() {
        let host = RelayError::NoClientListening { host: "host.com".into() };
        assert_eq!(host.status_code(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(host.to_string(), "no wormhole client listening for host.com");

        let timeout = RelayError::ResponseTimeout { req_id: "abc".into() };
        assert_eq!(timeout.status_code(), StatusCode::REQUEST_TIMEOUT);

        assert_eq!(
            RelayError::WebSocketUnavailable("closed".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RelayError::UpstreamFetch("refused".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn error_renders_plain_text_body() {
        let response = RelayError::NoClientListening { host: "a.io".into() }.into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"no wormhole client listening for a.io");
    }
}
