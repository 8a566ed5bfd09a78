//! # freemial-hub
//!
//! The connection hub: groups of WebSocket connections keyed by device id,
//! one controller per group, role-based message routing and the bind
//! handshake.
//!
//! - [`Registry`]: process-wide map of group id to [`Group`], created on
//!   demand and deleted when the last member leaves
//! - [`Group`]: member set plus the controller index, owns the routing policy
//! - [`Connection`]: role flag and bounded outbound delivery queue
//! - [`router`]: per-op dispatch, including the bind handshake
//!
//! Routing never blocks. A target whose delivery queue is full is evicted
//! from its group on the spot.

#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod group;
pub mod message;
pub mod registry;
pub mod router;

pub use connection::{Connection, ConnectionId, Role, SendOutcome};
pub use error::RouteError;
pub use group::Group;
pub use message::{BindRequest, BindResponse, Envelope, Op};
pub use registry::Registry;
pub use router::{DropReason, RouteOutcome};

/// Default capacity of a connection's outbound delivery queue.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;
