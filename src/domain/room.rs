//! Room identity and membership.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::{ConnectionHandle, ConnectionId, Identity, SessionId};

/// Kind of room, which decides its population rules and lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Participants of one chat session.
    Session,
    /// Every connection of one identity.
    User,
    /// Every admin chat connection.
    AdminBroadcast,
}

/// Name of a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// `user:{identity}`
    User(Identity),
    /// `session:{session_id}`
    Session(SessionId),
    /// `admin:broadcast`
    AdminBroadcast,
}

impl RoomId {
    /// Returns the kind of this room.
    #[must_use]
    pub const fn kind(&self) -> RoomKind {
        match self {
            Self::User(_) => RoomKind::User,
            Self::Session(_) => RoomKind::Session,
            Self::AdminBroadcast => RoomKind::AdminBroadcast,
        }
    }

    /// Pinned rooms survive losing their last member.
    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        !matches!(self, Self::Session(_))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(identity) => write!(f, "user:{identity}"),
            Self::Session(session_id) => write!(f, "session:{session_id}"),
            Self::AdminBroadcast => f.write_str("admin:broadcast"),
        }
    }
}

/// In-memory member set of one room.
#[derive(Debug)]
pub struct Room {
    /// Room name.
    pub id: RoomId,
    members: HashMap<ConnectionId, Arc<ConnectionHandle>>,
    /// Set once the router unlinked this room from its map. A joiner that
    /// raced with removal must retry against a fresh room.
    detached: bool,
}

impl Room {
    /// Creates an empty room.
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            members: HashMap::new(),
            detached: false,
        }
    }

    /// Adds a member. Returns `false` if it was already present.
    pub fn insert(&mut self, handle: Arc<ConnectionHandle>) -> bool {
        self.members.insert(handle.id, handle).is_none()
    }

    /// Removes a member. Returns `false` if it was not present.
    pub fn remove(&mut self, connection_id: ConnectionId) -> bool {
        self.members.remove(&connection_id).is_some()
    }

    /// Returns `true` if the connection is a member.
    #[must_use]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.members.contains_key(&connection_id)
    }

    /// Member ids.
    #[must_use]
    pub fn member_ids(&self) -> Vec<ConnectionId> {
        self.members.keys().copied().collect()
    }

    /// Member handles, for fan-out outside the room lock.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.members.values().map(Arc::clone).collect()
    }

    /// Removes and returns every member.
    pub fn drain(&mut self) -> Vec<Arc<ConnectionHandle>> {
        self.members.drain().map(|(_, handle)| handle).collect()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached
    }

    pub(crate) fn detach(&mut self) {
        self.detached = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefixed_names() {
        let session_id = SessionId::new();
        assert_eq!(RoomId::User(Identity::new("ann")).to_string(), "user:ann");
        assert_eq!(
            RoomId::Session(session_id).to_string(),
            format!("session:{session_id}")
        );
        assert_eq!(RoomId::AdminBroadcast.to_string(), "admin:broadcast");
    }

    #[test]
    fn only_session_rooms_are_ephemeral() {
        assert!(!RoomId::Session(SessionId::new()).is_pinned());
        assert!(RoomId::User(Identity::new("ann")).is_pinned());
        assert!(RoomId::AdminBroadcast.is_pinned());
    }
}
