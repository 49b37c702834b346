//! Service layer: business logic orchestration.
//!
//! [`ConnectionGateway`] runs handshakes, [`MessageRouter`] sequences and
//! routes chat traffic, and [`NotificationDispatcher`] delivers per-user
//! notifications. All three share the [`crate::domain::RoomRouter`] for
//! fan-out and reach storage through it.

pub mod connection_gateway;
pub mod message_router;
pub mod notification_dispatcher;

pub use connection_gateway::{Connected, ConnectionGateway};
pub use message_router::{Actor, MessageRouter};
pub use notification_dispatcher::NotificationDispatcher;
