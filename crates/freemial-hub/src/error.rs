//! Routing error types.

use thiserror::Error;

/// Reasons a payload could not be routed.
///
/// These never reach the sender. The router logs them and drops the payload.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The payload is not a valid message envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),
    /// A `bind` arrived without a `content` key.
    #[error("bind request has no content")]
    MissingBindContent,
    /// The `bind` content could not be parsed.
    #[error("malformed bind content: {0}")]
    MalformedBindContent(#[source] serde_json::Error),
    /// A response could not be serialized.
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_envelope_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("not-a-json").unwrap_err();
        let err = RouteError::MalformedEnvelope(json_err);
        assert!(err.to_string().starts_with("malformed envelope"));
    }

    #[test]
    fn source_is_preserved() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err = RouteError::MalformedBindContent(json_err);
        assert!(std::error::Error::source(&err).is_some());
    }
}
