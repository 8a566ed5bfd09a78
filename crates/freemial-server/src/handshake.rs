//! `WebSocket` handshake: query parsing and role assignment.

use std::collections::BTreeSet;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use freemial_hub::Role;
use metrics::counter;
use tracing::debug;

use crate::error::HandshakeError;
use crate::metrics::WS_HANDSHAKE_REJECTIONS_TOTAL;

/// Query key naming the group.
pub const DEVICE_ID_PARAM: &str = "deviceId";

/// Parameters resolved from the upgrade request's query string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectParams {
    /// Group to join.
    pub device_id: String,
    /// Role for the life of the connection.
    pub role: Role,
}

impl ConnectParams {
    /// Resolve params from decoded query pairs.
    ///
    /// `deviceId` as the only distinct key makes a controller; any other
    /// key makes a peer. Repeated keys count once, and the first
    /// `deviceId` wins. The id is used verbatim as the group key.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, HandshakeError> {
        let device_id = pairs
            .iter()
            .find(|(key, _)| key == DEVICE_ID_PARAM)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
            .ok_or(HandshakeError::MissingDeviceId)?;

        let keys: BTreeSet<&str> = pairs.iter().map(|(key, _)| key.as_str()).collect();
        let role = if keys.len() == 1 {
            Role::Controller
        } else {
            Role::Peer
        };

        Ok(Self {
            device_id: device_id.to_owned(),
            role,
        })
    }
}

impl<S> FromRequestParts<S> for ConnectParams
where
    S: Send + Sync,
{
    type Rejection = HandshakeError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let result = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|e| HandshakeError::InvalidQuery(e.body_text()))
            .and_then(|Query(pairs)| Self::from_pairs(&pairs));

        if let Err(ref error) = result {
            debug!(uri = %parts.uri, %error, "handshake rejected");
            counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => error.as_str()).increment(1);
        }
        result
    }
}
