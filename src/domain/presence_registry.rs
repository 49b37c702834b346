//! Live connection index.
//!
//! [`PresenceRegistry`] keeps every registered connection in two
//! [`DashMap`]s: by connection id and by owner identity. One identity may
//! hold any number of connections (multi-device); each one receives fan-out
//! independently.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use super::{
    ConnectionHandle, ConnectionId, EventBus, Identity, PresenceChange, PresenceEvent, RoomRouter,
};

/// Index of live connections.
#[derive(Debug)]
pub struct PresenceRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    by_identity: DashMap<Identity, HashSet<ConnectionId>>,
    rooms: Arc<RoomRouter>,
    events: EventBus,
}

impl PresenceRegistry {
    /// Creates an empty registry that cleans up memberships in `rooms`.
    #[must_use]
    pub fn new(rooms: Arc<RoomRouter>, events: EventBus) -> Self {
        Self {
            connections: DashMap::new(),
            by_identity: DashMap::new(),
            rooms,
            events,
        }
    }

    /// Adds a connection and publishes `connection-added`.
    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        self.by_identity
            .entry(handle.identity.clone())
            .or_default()
            .insert(handle.id);
        let id = handle.id;
        let identity = handle.identity.clone();
        let namespace = handle.namespace;
        self.connections.insert(id, handle);

        self.events.publish(PresenceEvent {
            change: PresenceChange::ConnectionAdded,
            connection_id: id,
            identity,
            namespace,
            online_connections: self.connections.len(),
            timestamp: Utc::now(),
        });
    }

    /// Removes a connection from every room, then from the index.
    ///
    /// Idempotent: returns `None` if the connection is unknown or was
    /// already unregistered.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let handle = self.connections.get(&connection_id).map(|h| Arc::clone(h.value()))?;
        if !handle.mark_closed() {
            return None;
        }

        let rooms_left = self.rooms.leave_all(&handle).await;

        self.connections.remove(&connection_id);
        self.by_identity
            .remove_if_mut(&handle.identity, |_, ids| {
                ids.remove(&connection_id);
                ids.is_empty()
            });

        tracing::debug!(%connection_id, rooms_left, "connection unregistered");
        self.events.publish(PresenceEvent {
            change: PresenceChange::ConnectionRemoved,
            connection_id,
            identity: handle.identity.clone(),
            namespace: handle.namespace,
            online_connections: self.connections.len(),
            timestamp: Utc::now(),
        });
        Some(handle)
    }

    /// Looks up a connection by id.
    #[must_use]
    pub fn get(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .get(&connection_id)
            .map(|h| Arc::clone(h.value()))
    }

    /// Every live connection of an identity.
    #[must_use]
    pub fn connections_of(&self, identity: &Identity) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<ConnectionId> = self
            .by_identity
            .get(identity)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// Returns `true` if the identity has at least one live connection.
    #[must_use]
    pub fn is_online(&self, identity: &Identity) -> bool {
        self.by_identity
            .get(identity)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
