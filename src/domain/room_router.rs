//! Room membership, fan-out and the per-session critical section.
//!
//! [`RoomRouter`] stores rooms in a `HashMap` where each entry is
//! individually protected by a [`tokio::sync::RwLock`]; the outer map lock
//! is only held for lookups and insert/remove. Session state (status, claim
//! holder, next sequence number) sits behind one [`tokio::sync::Mutex`] per
//! session. Claim and message sequencing both run inside that mutex, so
//! unrelated sessions never contend.
//!
//! Lock order is always outer map, then room. A room lock is never held
//! while taking the outer map lock.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{
    ChatSession, ConnectionHandle, ConnectionId, Delivery, Identity, Namespace, Room, RoomId,
    ServerEvent, SessionId, SessionStatus,
};
use crate::error::{GatewayError, RouteError};
use crate::persistence::{CasClaim, ChatStore};

/// Outcome of a claim attempt. Losing is informational, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The requester holds the claim.
    Claimed {
        /// `false` when the requester already held it before this call.
        newly_claimed: bool,
    },
    /// Another admin holds the claim.
    AlreadyClaimed {
        /// The admin holding the claim.
        by: Identity,
    },
}

/// Cached view of one session, valid while its mutex is held.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current status.
    pub status: SessionStatus,
    /// Guest who opened the session.
    pub guest: Identity,
    /// Claim holder.
    pub claimed_by: Option<Identity>,
    last_sequence: u64,
}

impl SessionState {
    fn from_session(session: &ChatSession, last_sequence: u64) -> Self {
        Self {
            status: session.status,
            guest: session.guest.clone(),
            claimed_by: session.claimed_by.clone(),
            last_sequence,
        }
    }

    fn apply(&mut self, session: &ChatSession) {
        self.status = session.status;
        self.claimed_by = session.claimed_by.clone();
    }

    /// Sequence number the next message must carry.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.last_sequence.saturating_add(1)
    }

    /// Records that `sequence` was durably stored.
    pub fn commit_sequence(&mut self, sequence: u64) {
        self.last_sequence = self.last_sequence.max(sequence);
    }

    /// Returns `true` if `identity` is the guest or the claim holder.
    #[must_use]
    pub fn is_participant(&self, identity: &Identity) -> bool {
        self.guest == *identity || self.claimed_by.as_ref() == Some(identity)
    }
}

#[derive(Debug)]
struct SessionSlot {
    loaded: bool,
    state: SessionState,
}

impl SessionSlot {
    fn unloaded() -> Self {
        Self {
            loaded: false,
            state: SessionState {
                status: SessionStatus::Unassigned,
                guest: Identity::anonymous(),
                claimed_by: None,
                last_sequence: 0,
            },
        }
    }
}

/// Exclusive access to one session's state. Dropping it ends the critical
/// section.
#[derive(Debug)]
pub struct SessionGuard {
    session_id: SessionId,
    slot: OwnedMutexGuard<SessionSlot>,
}

impl SessionGuard {
    /// Session this guard protects.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl Deref for SessionGuard {
    type Target = SessionState;

    fn deref(&self) -> &SessionState {
        &self.slot.state
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut SessionState {
        &mut self.slot.state
    }
}

/// Fan-out tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections the event was queued for.
    pub queued: usize,
    /// Connections that could not take it.
    pub dropped: usize,
}

/// Owner of all room membership and per-session locks.
#[derive(Debug)]
pub struct RoomRouter {
    rooms: RwLock<HashMap<RoomId, Arc<RwLock<Room>>>>,
    sessions: DashMap<SessionId, Arc<Mutex<SessionSlot>>>,
    store: Arc<dyn ChatStore>,
}

impl RoomRouter {
    /// Creates an empty router over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            sessions: DashMap::new(),
            store,
        }
    }

    /// Storage collaborator shared with the services.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    async fn get(&self, room_id: &RoomId) -> Option<Arc<RwLock<Room>>> {
        self.rooms.read().await.get(room_id).map(Arc::clone)
    }

    async fn get_or_create(&self, room_id: &RoomId) -> Arc<RwLock<Room>> {
        if let Some(room) = self.get(room_id).await {
            return room;
        }
        let mut map = self.rooms.write().await;
        Arc::clone(
            map.entry(room_id.clone())
                .or_insert_with(|| Arc::new(RwLock::new(Room::new(room_id.clone())))),
        )
    }

    /// Adds a connection to a room, creating the room on first join.
    ///
    /// Returns `false` if the connection was already a member or is
    /// already tearing down.
    pub async fn join(&self, room_id: RoomId, handle: &Arc<ConnectionHandle>) -> bool {
        if handle.is_closed() {
            return false;
        }
        let added = loop {
            let room = self.get_or_create(&room_id).await;
            let mut guard = room.write().await;
            if guard.is_detached() {
                continue;
            }
            break guard.insert(Arc::clone(handle));
        };
        handle.track_room(room_id.clone()).await;

        // Unregister may have drained the handle's rooms between the two
        // inserts above.
        if handle.is_closed() {
            self.leave(&room_id, handle.id).await;
            handle.untrack_room(&room_id).await;
            return false;
        }
        tracing::debug!(connection_id = %handle.id, room = %room_id, "joined room");
        added
    }

    /// Removes a connection from a room. Ephemeral rooms are destroyed when
    /// their last member leaves.
    pub async fn leave(&self, room_id: &RoomId, connection_id: ConnectionId) -> bool {
        let Some(room) = self.get(room_id).await else {
            return false;
        };
        let (removed, now_empty) = {
            let mut guard = room.write().await;
            let removed = guard.remove(connection_id);
            (removed, guard.is_empty())
        };
        if now_empty && !room_id.is_pinned() {
            self.remove_if_empty(room_id).await;
        }
        removed
    }

    async fn remove_if_empty(&self, room_id: &RoomId) {
        let mut map = self.rooms.write().await;
        let Some(room) = map.get(room_id).map(Arc::clone) else {
            return;
        };
        let mut guard = room.write().await;
        if guard.is_empty() {
            guard.detach();
            drop(guard);
            map.remove(room_id);
            drop(map);
            tracing::debug!(room = %room_id, "room destroyed");
            self.release_idle_slot(room_id);
        }
    }

    /// Drops the cached state behind a session room once nobody holds it.
    fn release_idle_slot(&self, room_id: &RoomId) {
        if let RoomId::Session(session_id) = room_id {
            self.sessions
                .remove_if(session_id, |_, slot| Arc::strong_count(slot) == 1);
        }
    }

    /// Removes a connection from every room it joined.
    pub async fn leave_all(&self, handle: &ConnectionHandle) -> usize {
        let rooms = handle.take_rooms().await;
        let mut left = 0;
        for room_id in &rooms {
            if self.leave(room_id, handle.id).await {
                left += 1;
            }
        }
        left
    }

    /// Removes a room and all its memberships at once.
    pub async fn dissolve(&self, room_id: &RoomId) -> usize {
        let room = {
            let mut map = self.rooms.write().await;
            map.remove(room_id)
        };
        let Some(room) = room else {
            return 0;
        };
        let members = {
            let mut guard = room.write().await;
            guard.detach();
            guard.drain()
        };
        for handle in &members {
            handle.untrack_room(room_id).await;
        }
        self.release_idle_slot(room_id);
        members.len()
    }

    /// Connection ids currently in a room.
    pub async fn members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        match self.get(room_id).await {
            Some(room) => room.read().await.member_ids(),
            None => Vec::new(),
        }
    }

    /// Returns `true` if the connection is in the room.
    pub async fn is_member(&self, room_id: &RoomId, connection_id: ConnectionId) -> bool {
        match self.get(room_id).await {
            Some(room) => room.read().await.contains(connection_id),
            None => false,
        }
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Queues an event for every member of a room.
    ///
    /// Members are snapshotted under the room's read lock and delivered to
    /// after it is released. A member that disconnects in between simply
    /// drops the event.
    pub async fn broadcast(&self, room_id: &RoomId, event: ServerEvent) -> FanOut {
        let Some(room) = self.get(room_id).await else {
            return FanOut::default();
        };
        let handles = room.read().await.handles();
        let event = Arc::new(event);
        let mut tally = FanOut::default();
        for handle in &handles {
            match handle.deliver(&event) {
                Delivery::Queued => tally.queued += 1,
                Delivery::Dropped => tally.dropped += 1,
                Delivery::Skipped => {}
            }
        }
        tally
    }

    /// Enters the critical section of an existing session, loading its
    /// state from the store on first use.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SessionNotFound`] for unknown sessions and
    /// propagates store failures.
    pub async fn lock_session(&self, session_id: SessionId) -> Result<SessionGuard, GatewayError> {
        let slot = Arc::clone(
            self.sessions
                .entry(session_id)
                .or_insert_with(|| Arc::new(Mutex::new(SessionSlot::unloaded())))
                .value(),
        );
        let mut guard = Arc::clone(&slot).lock_owned().await;
        if !guard.loaded {
            let Some(session) = self.store.load_session(session_id).await? else {
                drop(guard);
                self.sessions
                    .remove_if(&session_id, |_, existing| Arc::ptr_eq(existing, &slot));
                return Err(GatewayError::SessionNotFound(session_id));
            };
            let last_sequence = self.store.last_sequence(session_id).await?;
            guard.state = SessionState::from_session(&session, last_sequence);
            guard.loaded = true;
        }
        Ok(SessionGuard {
            session_id,
            slot: guard,
        })
    }

    /// Registers a freshly created session and enters its critical section.
    pub async fn open_session(&self, session: &ChatSession) -> SessionGuard {
        let slot = Arc::new(Mutex::new(SessionSlot {
            loaded: true,
            state: SessionState::from_session(session, 0),
        }));
        self.sessions.insert(session.id, Arc::clone(&slot));
        SessionGuard {
            session_id: session.id,
            slot: slot.lock_owned().await,
        }
    }

    /// Number of sessions with cached state.
    #[must_use]
    pub fn cached_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Forgets cached session state that no caller holds and no live
    /// session room needs. Evicted sessions reload from the store on next
    /// use. Returns how many slots were dropped.
    pub async fn sweep_sessions(&self) -> usize {
        let live: HashSet<SessionId> = self
            .rooms
            .read()
            .await
            .keys()
            .filter_map(|room_id| match room_id {
                RoomId::Session(id) => Some(*id),
                RoomId::User(_) | RoomId::AdminBroadcast => None,
            })
            .collect();
        let before = self.sessions.len();
        self.sessions
            .retain(|id, slot| live.contains(id) || Arc::strong_count(slot) > 1);
        before.saturating_sub(self.sessions.len())
    }

    /// Forgets the cached state of a session. Callers still holding the
    /// slot keep working against it; later callers reload from the store.
    pub fn evict_session(&self, session_id: SessionId) {
        self.sessions.remove(&session_id);
    }

    /// Compare-and-swap claim of an unassigned session, inside the
    /// session's critical section.
    ///
    /// On success the admin's chat connections join the session room. An
    /// admin re-claiming a session it already holds succeeds again.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::SessionClosed`] for closed sessions and
    /// propagates store failures.
    pub async fn claim(
        &self,
        guard: &mut SessionGuard,
        admin: &Identity,
        admin_connections: &[Arc<ConnectionHandle>],
    ) -> Result<ClaimOutcome, GatewayError> {
        if guard.status == SessionStatus::Closed {
            return Err(RouteError::SessionClosed.into());
        }

        let newly_claimed = match guard.claimed_by.clone() {
            Some(holder) if holder == *admin => false,
            Some(holder) => return Ok(ClaimOutcome::AlreadyClaimed { by: holder }),
            None => {
                let (won, session) = match self.store.cas_claim(guard.session_id(), admin).await? {
                    CasClaim::Won(session) => (true, session),
                    CasClaim::Lost(session) => (false, session),
                };
                guard.apply(&session);
                if session.status == SessionStatus::Closed {
                    return Err(RouteError::SessionClosed.into());
                }
                match session.claimed_by {
                    Some(holder) if holder == *admin => won,
                    Some(holder) => return Ok(ClaimOutcome::AlreadyClaimed { by: holder }),
                    None => {
                        return Err(GatewayError::Internal(format!(
                            "claim on session {} left no holder",
                            guard.session_id()
                        )));
                    }
                }
            }
        };

        let room_id = RoomId::Session(guard.session_id());
        for handle in admin_connections
            .iter()
            .filter(|h| h.namespace == Namespace::Chat)
        {
            self.join(room_id.clone(), handle).await;
        }
        Ok(ClaimOutcome::Claimed { newly_claimed })
    }
}
