//! Chat messages and notification events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Identity, MessageId, NotificationId, Role, SessionId};

/// Message origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Written by a participant.
    Text,
    /// Generated by the gateway (claim, close).
    System,
}

impl MessageType {
    /// Returns the storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::System => "system",
        }
    }
}

/// Durable chat message.
///
/// `sequence` is strictly increasing within a session and defines delivery
/// order; `id` is globally unique so clients can de-duplicate redeliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    /// Globally unique id.
    #[schema(value_type = String, format = Uuid)]
    pub id: MessageId,
    /// Owning session.
    #[schema(value_type = String, format = Uuid)]
    pub session_id: SessionId,
    /// Per-session sequence number, starting at 1.
    pub sequence: u64,
    /// Sender identity.
    #[schema(value_type = String)]
    pub sender: Identity,
    /// Sender role at send time.
    #[schema(value_type = String)]
    pub sender_role: Role,
    /// Message body.
    pub content: String,
    /// Text or system.
    pub message_type: MessageType,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Durable per-user notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NotificationEvent {
    /// Notification id.
    #[schema(value_type = String, format = Uuid)]
    pub id: NotificationId,
    /// Recipient.
    #[schema(value_type = String)]
    pub user: Identity,
    /// Producer-defined kind, e.g. `task_assigned`.
    pub kind: String,
    /// Producer-defined payload.
    pub payload: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Acknowledgement time; `None` while unread.
    pub read_at: Option<DateTime<Utc>>,
}

impl NotificationEvent {
    /// Creates an unread notification.
    #[must_use]
    pub fn new(user: Identity, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: NotificationId::new(),
            user,
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
            read_at: None,
        }
    }

    /// Returns `true` until the event is marked read.
    #[must_use]
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }
}
