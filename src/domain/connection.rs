//! Live connection handles, roles and namespaces.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;

use super::{ConnectionId, Identity, RoomId, ServerEvent};

/// Role claim carried by a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Anonymous or lightly identified support customer.
    Guest,
    /// Regular workspace member.
    Member,
    /// Support staff; may claim sessions and receives admin broadcasts.
    Admin,
}

impl Role {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Self::Guest),
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Logical partition of the socket protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Support chat: sessions, claims, messages.
    Chat,
    /// Per-user notification feed.
    Notifications,
    /// Unauthenticated health and ping checks.
    Diagnostic,
}

impl Namespace {
    /// Whether connecting to this namespace requires a credential.
    #[must_use]
    pub const fn requires_credential(self) -> bool {
        !matches!(self, Self::Diagnostic)
    }

    /// Returns the wire name of the namespace.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Notifications => "notifications",
            Self::Diagnostic => "diagnostic",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "notifications" => Ok(Self::Notifications),
            "diagnostic" => Ok(Self::Diagnostic),
            other => Err(format!("unknown namespace: {other}")),
        }
    }
}

/// Outcome of handing one event to a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Event queued for the connection's writer task.
    Queued,
    /// Event belongs to another namespace; not sent.
    Skipped,
    /// Queue full or writer gone. Compensated by pull queries.
    Dropped,
}

/// Ephemeral state of one authenticated (or diagnostic) connection.
///
/// Owned by the connection gateway for the lifetime of the socket; the
/// presence registry and rooms hold shared references for fan-out.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection id.
    pub id: ConnectionId,
    /// Owner identity from the verified token.
    pub identity: Identity,
    /// Role claim from the verified token.
    pub role: Role,
    /// Namespace selected at handshake.
    pub namespace: Namespace,
    /// Optional display name claim.
    pub display_name: Option<String>,
    /// Handshake completion time.
    pub authenticated_at: DateTime<Utc>,
    rooms: RwLock<HashSet<RoomId>>,
    outbound: mpsc::Sender<Arc<ServerEvent>>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    /// Creates a handle together with the receiving end of its outbound
    /// queue, which the connection's writer task drains.
    #[must_use]
    pub fn new(
        identity: Identity,
        role: Role,
        namespace: Namespace,
        display_name: Option<String>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (outbound, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            identity,
            role,
            namespace,
            display_name,
            authenticated_at: Utc::now(),
            rooms: RwLock::new(HashSet::new()),
            outbound,
            closed: AtomicBool::new(false),
        };
        (handle, rx)
    }

    /// Returns `true` for admin connections.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Name shown to other participants.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.identity.as_str())
    }

    /// Queues an event without waiting.
    pub fn deliver(&self, event: &Arc<ServerEvent>) -> Delivery {
        if event.namespace() != self.namespace {
            return Delivery::Skipped;
        }
        match self.outbound.try_send(Arc::clone(event)) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.id, "outbound queue full, dropping event");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %self.id, "writer gone, dropping event");
                Delivery::Dropped
            }
        }
    }

    /// Snapshot of the rooms this connection is currently in.
    pub async fn rooms(&self) -> Vec<RoomId> {
        self.rooms.read().await.iter().cloned().collect()
    }

    /// Returns `true` once the connection has started tearing down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the handle closed. Returns `true` only for the first call.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) async fn track_room(&self, room: RoomId) {
        self.rooms.write().await.insert(room);
    }

    pub(crate) async fn untrack_room(&self, room: &RoomId) {
        self.rooms.write().await.remove(room);
    }

    pub(crate) async fn take_rooms(&self) -> Vec<RoomId> {
        self.rooms.write().await.drain().collect()
    }
}
