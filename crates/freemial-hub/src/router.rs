//! Per-op dispatch of inbound payloads within a group.
//!
//! | op | from controller | from peer |
//! |---|---|---|
//! | `bind` | bind response to the sender only | ignored |
//! | status ops | raw payload to every other member | raw payload to the controller, dropped if none |
//! | `messageCountRequest` | ignored | ignored |
//! | anything else | logged, dropped | logged, dropped |
//!
//! Delivery uses `try_send`. A target whose queue is full is evicted from the
//! group before `route` returns: its queue is closed and its membership
//! removed. This is the backpressure contract, so a slow consumer can never
//! stall the sender's read loop.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::{Connection, SendOutcome};
use crate::error::RouteError;
use crate::group::Group;
use crate::message::{BindRequest, BindResponse, Envelope, Op};

/// Why a payload was dropped without delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Envelope or op content failed to parse.
    Malformed,
    /// A peer sent status traffic while the group has no controller.
    NoController,
    /// Unrecognized op tag.
    UnknownOp,
}

impl DropReason {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::NoController => "no_controller",
            Self::UnknownOp => "unknown_op",
        }
    }
}

/// What happened to one routed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The payload was offered to its targets.
    Delivered {
        /// Targets whose queue accepted it.
        recipients: usize,
        /// Targets evicted because their queue was full.
        evicted: usize,
    },
    /// Accepted and deliberately not acted on (role filter or reserved op).
    Ignored,
    /// Dropped before any delivery attempt.
    Dropped(DropReason),
}

impl RouteOutcome {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Ignored => "ignored",
            Self::Dropped(reason) => reason.as_str(),
        }
    }
}

pub(crate) fn route(group: &Group, sender: &Arc<Connection>, raw: &str) -> RouteOutcome {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            let error = RouteError::MalformedEnvelope(e);
            warn!(group_id = group.id(), conn_id = %sender.id(), %error, raw, "malformed request");
            return RouteOutcome::Dropped(DropReason::Malformed);
        }
    };

    match envelope.op() {
        Op::Bind => handle_bind(group, sender, &envelope),
        op if op.is_status() => forward_status(group, sender, raw),
        Op::MessageCountRequest => RouteOutcome::Ignored,
        op => {
            warn!(group_id = group.id(), op = op.as_str(), raw, "unhandled op");
            RouteOutcome::Dropped(DropReason::UnknownOp)
        }
    }
}

fn handle_bind(group: &Group, sender: &Arc<Connection>, envelope: &Envelope) -> RouteOutcome {
    if !sender.role().is_controller() {
        debug!(group_id = group.id(), conn_id = %sender.id(), "bind from peer ignored");
        return RouteOutcome::Ignored;
    }

    let request = match parse_bind_content(envelope.content.as_ref()) {
        Ok(request) => request,
        Err(error) => {
            warn!(group_id = group.id(), %error, "malformed bind request");
            return RouteOutcome::Dropped(DropReason::Malformed);
        }
    };

    let response = BindResponse::bound(envelope.sender_id(), &request, chrono::Utc::now());
    let payload: Arc<str> = match serde_json::to_string(&response) {
        Ok(json) => Arc::from(json),
        Err(e) => {
            let error = RouteError::Encode(e);
            tracing::error!(group_id = group.id(), %error, "failed to serialize bind response");
            return RouteOutcome::Dropped(DropReason::Malformed);
        }
    };

    debug!(
        group_id = group.id(),
        sender_id = envelope.sender_id(),
        serial_number = %request.serial_number,
        "bind confirmed"
    );
    deliver(group, std::slice::from_ref(sender), &payload)
}

/// `null` content binds with empty fields; an absent key is an error.
fn parse_bind_content(content: Option<&Value>) -> Result<BindRequest, RouteError> {
    match content {
        None => Err(RouteError::MissingBindContent),
        Some(Value::Null) => Ok(BindRequest::default()),
        Some(value) => BindRequest::deserialize(value).map_err(RouteError::MalformedBindContent),
    }
}

fn forward_status(group: &Group, sender: &Arc<Connection>, raw: &str) -> RouteOutcome {
    let targets = if sender.role().is_controller() {
        group.members_except(sender.id())
    } else {
        match group.controller() {
            Some(controller) => vec![controller],
            None => {
                debug!(group_id = group.id(), "no controller, status dropped");
                return RouteOutcome::Dropped(DropReason::NoController);
            }
        }
    };

    let payload: Arc<str> = Arc::from(raw);
    deliver(group, &targets, &payload)
}

fn deliver(group: &Group, targets: &[Arc<Connection>], payload: &Arc<str>) -> RouteOutcome {
    let mut recipients = 0;
    let mut evicted = 0;

    for target in targets {
        match target.send(Arc::clone(payload)) {
            SendOutcome::Queued => recipients += 1,
            SendOutcome::Full => {
                warn!(
                    group_id = group.id(),
                    conn_id = %target.id(),
                    role = %target.role(),
                    "delivery queue full, evicting connection"
                );
                group.unregister(target);
                evicted += 1;
            }
            SendOutcome::Closed => {
                debug!(group_id = group.id(), conn_id = %target.id(), "target already closed");
            }
        }
    }

    RouteOutcome::Delivered { recipients, evicted }
}
