//! Events pushed from the server to connections.
//!
//! [`ServerEvent`] is what room fan-out carries; each variant belongs to
//! exactly one namespace and is only delivered to connections of that
//! namespace. [`PresenceEvent`] travels over the [`super::EventBus`] when a
//! connection is added to or removed from the presence registry.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    ConnectionId, GuestSummary, Identity, Message, Namespace, NotificationEvent, SessionId,
};

/// Direction of a presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceChange {
    /// A connection finished its handshake.
    ConnectionAdded,
    /// A connection was torn down.
    ConnectionRemoved,
}

/// Fan-out event addressed to a room.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// New message in a session.
    #[serde(rename = "chat:message")]
    ChatMessage {
        /// Session the message belongs to.
        session_id: SessionId,
        /// Stored message, including its sequence number.
        message: Message,
    },

    /// A session was closed; no further messages are accepted.
    #[serde(rename = "chat:session-closed")]
    SessionClosed {
        /// Closed session.
        session_id: SessionId,
        /// Participant who closed it.
        closed_by: Identity,
    },

    /// A guest opened a session nobody has claimed yet.
    #[serde(rename = "admin:new-chat-request")]
    NewChatRequest {
        /// New session.
        session_id: SessionId,
        /// Who is asking and what they said first.
        guest_summary: GuestSummary,
    },

    /// A notification for the receiving user.
    #[serde(rename = "notifications:push")]
    NotificationPushed {
        /// Stored notification.
        notification: NotificationEvent,
    },

    /// Current unread notification count of the receiving user.
    #[serde(rename = "notifications:unread-count")]
    UnreadCount {
        /// Number of unread notifications.
        count: u64,
        /// Increases with every refresh; clients keep the highest seen.
        version: u64,
    },

    /// Aggregate presence change, for diagnostic monitors.
    #[serde(rename = "diagnostic:presence")]
    Presence {
        /// Added or removed.
        change: PresenceChange,
        /// Namespace of the connection that changed.
        namespace: Namespace,
        /// Registered connections after the change.
        online_connections: usize,
    },
}

impl ServerEvent {
    /// Namespace whose connections receive this event.
    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        match self {
            Self::ChatMessage { .. } | Self::SessionClosed { .. } | Self::NewChatRequest { .. } => {
                Namespace::Chat
            }
            Self::NotificationPushed { .. } | Self::UnreadCount { .. } => Namespace::Notifications,
            Self::Presence { .. } => Namespace::Diagnostic,
        }
    }
}

/// Registry change published on the event bus.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceEvent {
    /// Added or removed.
    pub change: PresenceChange,
    /// Affected connection.
    pub connection_id: ConnectionId,
    /// Owner of the affected connection.
    pub identity: Identity,
    /// Namespace of the affected connection.
    pub namespace: Namespace,
    /// Registered connections after the change.
    pub online_connections: usize,
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
}

impl PresenceEvent {
    /// Identity-free projection sent to diagnostic connections.
    #[must_use]
    pub fn to_server_event(&self) -> ServerEvent {
        ServerEvent::Presence {
            change: self.change,
            namespace: self.namespace,
            online_connections: self.online_connections,
        }
    }
}
