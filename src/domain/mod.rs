//! Domain layer: identifiers, connections, rooms, sessions and the
//! in-memory registries that route events between them.
//!
//! The presence registry and room router are derived, rebuildable
//! indexes: they start empty on every process start and are repopulated as
//! clients handshake again. Durable state lives behind
//! [`crate::persistence::ChatStore`].

pub mod connection;
pub mod event_bus;
pub mod events;
pub mod ids;
pub mod message;
pub mod presence_registry;
pub mod room;
pub mod room_router;
pub mod session;

pub use connection::{ConnectionHandle, Delivery, Namespace, Role};
pub use event_bus::EventBus;
pub use events::{PresenceChange, PresenceEvent, ServerEvent};
pub use ids::{ConnectionId, Identity, MessageId, NotificationId, SessionId};
pub use message::{Message, MessageType, NotificationEvent};
pub use presence_registry::PresenceRegistry;
pub use room::{Room, RoomId, RoomKind};
pub use room_router::{ClaimOutcome, RoomRouter, SessionGuard, SessionState};
pub use session::{ChatSession, GuestProfile, GuestSummary, SessionStatus};
