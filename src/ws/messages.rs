//! WebSocket frames: per-namespace client commands and server replies.
//!
//! Every frame is a JSON object tagged by `"event"`. Clients may attach a
//! `"ref"` of any JSON type to a command; it is echoed unchanged in the
//! `reply` or `error` frame that answers it. Fan-out events are
//! [`ServerEvent`](crate::domain::ServerEvent)s serialized as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    ConnectionId, Identity, Namespace, NotificationId, Role, SessionId,
};
use crate::error::GatewayError;

/// Commands accepted on the `chat` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event")]
pub enum ChatCommand {
    /// Post into a session; without `session_id` a new session is opened.
    #[serde(rename = "chat:send-message")]
    SendMessage {
        /// Target session.
        #[serde(default)]
        session_id: Option<SessionId>,
        /// Message body.
        content: String,
    },
    /// Claim an unassigned session (admins).
    #[serde(rename = "chat:claim")]
    Claim {
        /// Session to claim.
        session_id: SessionId,
    },
    /// Re-enter a session room after reconnecting.
    #[serde(rename = "chat:join")]
    Join {
        /// Session to join.
        session_id: SessionId,
    },
    /// Close a session.
    #[serde(rename = "chat:close")]
    Close {
        /// Session to close.
        session_id: SessionId,
    },
    /// Fetch stored messages after a sequence number.
    #[serde(rename = "chat:history")]
    History {
        /// Session to read.
        session_id: SessionId,
        /// Exclusive lower bound; `0` for the whole session.
        #[serde(default)]
        after_sequence: u64,
        /// Page size.
        #[serde(default)]
        limit: Option<u32>,
    },
    /// Sessions waiting for an admin (admins).
    #[serde(rename = "chat:list-unassigned")]
    ListUnassigned,
}

/// Commands accepted on the `notifications` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event")]
pub enum NotificationCommand {
    /// Current unread count.
    #[serde(rename = "notifications:get-unread-count")]
    GetUnreadCount,
    /// Acknowledge one notification.
    #[serde(rename = "notifications:mark-read")]
    MarkRead {
        /// Notification to acknowledge.
        event_id: NotificationId,
    },
}

/// Commands accepted on the `diagnostic` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event")]
pub enum DiagnosticCommand {
    /// Liveness check.
    #[serde(rename = "diagnostic:ping")]
    Ping {
        /// Opaque value echoed in the pong.
        #[serde(default)]
        nonce: Option<String>,
    },
}

/// A command, already matched to the connection's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Chat namespace command.
    Chat(ChatCommand),
    /// Notifications namespace command.
    Notifications(NotificationCommand),
    /// Diagnostic namespace command.
    Diagnostic(DiagnosticCommand),
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Client correlation value.
    pub reference: Option<Value>,
    /// The command.
    pub command: ClientCommand,
}

/// An inbound frame that could not be accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    /// Correlation value, if the frame was at least a JSON object.
    pub reference: Option<Value>,
    /// What was wrong.
    pub message: String,
}

/// Parses a text frame received on `namespace`.
///
/// # Errors
///
/// Returns [`Rejected`] for malformed JSON, unknown events, missing
/// fields, and events belonging to another namespace.
pub fn parse_inbound(namespace: Namespace, text: &str) -> Result<Inbound, Rejected> {
    let mut value: Value = serde_json::from_str(text).map_err(|e| Rejected {
        reference: None,
        message: format!("malformed JSON: {e}"),
    })?;
    let reference = value.as_object_mut().and_then(|obj| obj.remove("ref"));

    let parsed = match namespace {
        Namespace::Chat => serde_json::from_value(value).map(ClientCommand::Chat),
        Namespace::Notifications => serde_json::from_value(value).map(ClientCommand::Notifications),
        Namespace::Diagnostic => serde_json::from_value(value).map(ClientCommand::Diagnostic),
    };
    match parsed {
        Ok(command) => Ok(Inbound { reference, command }),
        Err(e) => Err(Rejected {
            reference,
            message: format!("unsupported {namespace} command: {e}"),
        }),
    }
}

/// Direct (non fan-out) frames sent by the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ServerFrame {
    /// Handshake accepted.
    #[serde(rename = "connected")]
    Connected {
        /// Assigned connection id.
        connection_id: ConnectionId,
        /// Verified identity.
        identity: Identity,
        /// Verified role.
        role: Role,
        /// Namespace joined.
        namespace: Namespace,
    },
    /// Handshake refused; a close frame follows.
    #[serde(rename = "connect_error")]
    ConnectError {
        /// `no_credential`, `invalid_or_expired` or `rate_limited`.
        reason: String,
        /// Retry hint for rate limiting.
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },
    /// Successful answer to a command.
    #[serde(rename = "reply")]
    Reply {
        /// Echoed correlation value.
        #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
        reference: Option<Value>,
        /// Command-specific result.
        data: Value,
    },
    /// Failed command. The connection stays open.
    #[serde(rename = "error")]
    Error {
        /// Echoed correlation value.
        #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
        reference: Option<Value>,
        /// Numeric error code.
        code: u32,
        /// Stable snake_case reason.
        reason: String,
        /// Human-readable message.
        message: String,
    },
    /// Answer to `diagnostic:ping`.
    #[serde(rename = "diagnostic:pong")]
    Pong {
        /// Echoed correlation value.
        #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
        reference: Option<Value>,
        /// Echoed nonce.
        #[serde(skip_serializing_if = "Option::is_none")]
        nonce: Option<String>,
    },
}

impl ServerFrame {
    /// Error frame for a failed command.
    #[must_use]
    pub fn from_error(reference: Option<Value>, err: &GatewayError) -> Self {
        Self::Error {
            reference,
            code: err.error_code(),
            reason: err.reason().to_string(),
            message: err.to_string(),
        }
    }

    /// Error frame for a frame that never became a command.
    #[must_use]
    pub fn from_rejected(rejected: Rejected) -> Self {
        Self::from_error(
            rejected.reference,
            &GatewayError::InvalidRequest(rejected.message),
        )
    }
}

/// Claim result as sent to the claiming admin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimReply {
    /// The caller holds the claim.
    Claimed {
        /// Claimed session.
        session_id: SessionId,
    },
    /// Someone else got there first.
    AlreadyClaimed {
        /// Contested session.
        session_id: SessionId,
        /// Winner.
        claimed_by: Identity,
    },
}
