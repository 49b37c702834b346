//! WebSocket layer: handshake, per-connection loop, wire frames.
//!
//! Each namespace has its own endpoint, `/ws/{namespace}`, and its own
//! closed set of client commands.

pub mod connection;
pub mod handler;
pub mod messages;
