//! Reconnection policy.
//!
//! Two halves: the client-side [`ReconnectMachine`] that decides when to
//! retry a lost connection, and the server-side [`ConnectRateLimiter`] that
//! bounds how often one peer may attempt a handshake.

pub mod backoff;
pub mod rate_limit;

pub use backoff::{
    ConnectFailure, ReconnectMachine, ReconnectPolicy, ReconnectState, ReconnectTrigger, drive,
};
pub use rate_limit::ConnectRateLimiter;
