//! # freemial-server
//!
//! Axum HTTP + `WebSocket` front end for the hub.
//!
//! - `WebSocket` endpoint at `/`: handshake, role assignment, per-connection
//!   inbound and outbound pumps with ping/pong keepalive
//! - REST stubs: `/login` and `/device/bindings`
//! - Operational endpoints: `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod handshake;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
