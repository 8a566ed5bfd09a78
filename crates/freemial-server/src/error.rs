//! Server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Other I/O failure while serving.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A `WebSocket` handshake rejected before upgrade.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// `deviceId` is absent or empty.
    #[error("missing deviceId query parameter")]
    MissingDeviceId,
    /// The query string could not be decoded.
    #[error("invalid query string: {0}")]
    InvalidQuery(String),
}

impl HandshakeError {
    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingDeviceId => "missing_device_id",
            Self::InvalidQuery(_) => "invalid_query",
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// Why a session's transport ended.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A frame write did not complete within `write_wait`.
    #[error("write timed out")]
    WriteTimeout,
    /// No Pong arrived within `pong_wait`.
    #[error("read deadline expired")]
    ReadTimeout,
    /// The socket reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_error_maps_to_bad_request() {
        let resp = HandshakeError::MissingDeviceId.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn handshake_error_labels() {
        assert_eq!(HandshakeError::MissingDeviceId.as_str(), "missing_device_id");
        assert_eq!(
            HandshakeError::InvalidQuery("x".into()).as_str(),
            "invalid_query"
        );
    }

    #[test]
    fn bind_error_display_names_address() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("0.0.0.0:80"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn session_error_display() {
        assert_eq!(SessionError::WriteTimeout.to_string(), "write timed out");
        assert_eq!(SessionError::ReadTimeout.to_string(), "read deadline expired");
    }
}
