//! `WebSocket` transport: one session task pair per connected client.

pub mod session;
