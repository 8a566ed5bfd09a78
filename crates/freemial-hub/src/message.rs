//! Wire types: the inbound envelope, op tags and the bind handshake payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Binding id returned in every bind response.
///
/// Fixed sentinel; clients only check that it is present.
pub const BINDING_ID: i64 = 6805;

/// `timeout` field of the bind response, in milliseconds.
pub const BIND_RESPONSE_TIMEOUT_MS: u64 = 1_800_000;

/// Inbound message envelope.
///
/// Only `op` drives routing. `content` is kept opaque until an op handler
/// needs it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Operation tag.
    #[serde(default)]
    pub op: String,
    /// Sender-chosen identifier, echoed in bind responses.
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Op-specific payload. `None` when the key is absent; an explicit
    /// `null` is `Some(Value::Null)`.
    #[serde(default, deserialize_with = "present")]
    pub content: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// Sender id, or `""` when absent.
    pub fn sender_id(&self) -> &str {
        self.sender_id.as_deref().unwrap_or_default()
    }

    /// Parsed operation tag.
    pub fn op(&self) -> Op<'_> {
        Op::parse(&self.op)
    }
}

/// Operation tags understood by the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op<'a> {
    /// Controller-only bind handshake.
    Bind,
    /// Device status report.
    DeviceStatus,
    /// Brew progress report.
    BrewStatus,
    /// Brew finished notification.
    BrewingComplete,
    /// Status query.
    GetDeviceStatus,
    /// Reserved; accepted and ignored.
    MessageCountRequest,
    /// Anything else.
    Unknown(&'a str),
}

impl<'a> Op<'a> {
    /// Map a wire tag to an op.
    pub fn parse(tag: &'a str) -> Self {
        match tag {
            "bind" => Self::Bind,
            "deviceStatus" => Self::DeviceStatus,
            "brewStatus" => Self::BrewStatus,
            "brewingComplete" => Self::BrewingComplete,
            "getDeviceStatus" => Self::GetDeviceStatus,
            "messageCountRequest" => Self::MessageCountRequest,
            other => Self::Unknown(other),
        }
    }

    /// Wire tag.
    pub fn as_str(self) -> &'a str {
        match self {
            Self::Bind => "bind",
            Self::DeviceStatus => "deviceStatus",
            Self::BrewStatus => "brewStatus",
            Self::BrewingComplete => "brewingComplete",
            Self::GetDeviceStatus => "getDeviceStatus",
            Self::MessageCountRequest => "messageCountRequest",
            Self::Unknown(tag) => tag,
        }
    }

    /// Status and telemetry ops, relayed verbatim between roles.
    pub fn is_status(self) -> bool {
        matches!(
            self,
            Self::DeviceStatus | Self::BrewStatus | Self::BrewingComplete | Self::GetDeviceStatus
        )
    }
}

/// Content of a `bind` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BindRequest {
    /// Device serial number.
    pub serial_number: String,
    /// Bind code, echoed back in the response.
    pub code: String,
}

/// Bind confirmation sent back to the requesting controller.
///
/// Field order is the wire order. `Option` fields are always written,
/// as `null` when empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindResponse {
    /// Always `"bindingStatus"`.
    pub op: String,
    /// `device://` + requester's sender id.
    pub received_id: String,
    /// Always `"broker://device"`.
    pub sender_id: String,
    /// Always null.
    pub client_id: Option<String>,
    /// Always `"application/json"`.
    pub mime: String,
    /// Unix seconds.
    pub creation_date: i64,
    /// Always null.
    pub dispatch_date: Option<i64>,
    /// Always null.
    pub change_date: Option<i64>,
    /// Milliseconds.
    pub timeout: u64,
    /// Always null.
    pub use_case_id: Option<String>,
    /// Always 0.
    pub redelivered: u32,
    /// Always true.
    pub durable: bool,
    /// Always false.
    #[serde(rename = "async")]
    pub is_async: bool,
    /// Always `"Pending"`.
    pub message_status: String,
    /// Always null.
    pub destination_topic: Option<String>,
    /// Always 0.
    pub scheduled_delay: u64,
    /// Always null.
    pub software_version: Option<String>,
    /// The binding record.
    pub content: BindingState,
}

/// Binding record inside a [`BindResponse`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingState {
    /// Always [`BINDING_ID`].
    pub binding_id: i64,
    /// Requester's sender id.
    pub device_id: String,
    /// Always null.
    pub user_id: Option<String>,
    /// Always `"BOUND"`.
    pub state: String,
    /// Unix seconds.
    pub change_date: i64,
    /// Echoed bind code.
    pub code: String,
    /// Always null.
    pub name: Option<String>,
    /// Always null.
    pub user: Option<String>,
}

impl BindResponse {
    /// Build the confirmation for a bind request from `sender_id`.
    pub fn bound(sender_id: &str, request: &BindRequest, now: DateTime<Utc>) -> Self {
        let ts = now.timestamp();
        Self {
            op: "bindingStatus".into(),
            received_id: format!("device://{sender_id}"),
            sender_id: "broker://device".into(),
            client_id: None,
            mime: "application/json".into(),
            creation_date: ts,
            dispatch_date: None,
            change_date: None,
            timeout: BIND_RESPONSE_TIMEOUT_MS,
            use_case_id: None,
            redelivered: 0,
            durable: true,
            is_async: false,
            message_status: "Pending".into(),
            destination_topic: None,
            scheduled_delay: 0,
            software_version: None,
            content: BindingState {
                binding_id: BINDING_ID,
                device_id: sender_id.to_owned(),
                user_id: None,
                state: "BOUND".into(),
                change_date: ts,
                code: request.code.clone(),
                name: None,
                user: None,
            },
        }
    }
}
