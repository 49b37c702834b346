//! Chat message routing: validation, sequencing, persistence, fan-out.
//!
//! Every message is appended inside its session's critical section:
//! take the next sequence number, persist, commit the number, then fan
//! out. Fan-out only queues, so the section stays short, and members see
//! messages in sequence order.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    ChatSession, ClaimOutcome, ConnectionHandle, GuestProfile, GuestSummary, Identity, Message,
    MessageId, MessageType, Namespace, PresenceRegistry, Role, RoomId, RoomRouter, ServerEvent,
    SessionGuard, SessionId, SessionStatus,
};
use crate::error::{GatewayError, RouteError};

/// Page size for history queries without an explicit limit.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
/// Largest page a history query may request.
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// Who is acting, independent of transport.
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    /// Acting identity.
    pub identity: &'a Identity,
    /// Its role.
    pub role: Role,
    /// Name shown in system messages.
    pub label: &'a str,
}

impl<'a> From<&'a ConnectionHandle> for Actor<'a> {
    fn from(handle: &'a ConnectionHandle) -> Self {
        Self {
            identity: &handle.identity,
            role: handle.role,
            label: handle.label(),
        }
    }
}

/// Routes chat commands between participants.
#[derive(Debug)]
pub struct MessageRouter {
    rooms: Arc<RoomRouter>,
    presence: Arc<PresenceRegistry>,
    max_message_length: usize,
}

impl MessageRouter {
    /// Creates a router.
    #[must_use]
    pub fn new(
        rooms: Arc<RoomRouter>,
        presence: Arc<PresenceRegistry>,
        max_message_length: usize,
    ) -> Self {
        Self {
            rooms,
            presence,
            max_message_length,
        }
    }

    /// Sends a message from a connection.
    ///
    /// With `session_id = None` a guest or member opens a new session
    /// implicitly. Otherwise the connection must already be in the session
    /// room.
    ///
    /// # Errors
    ///
    /// - [`RouteError::InvalidContent`] for empty or oversized content.
    /// - [`RouteError::NotAMember`] if the connection is not in the session
    ///   room, or an admin tries to open a session.
    /// - [`RouteError::SessionClosed`] if the session is closed.
    /// - [`GatewayError::PersistenceError`] if the store fails; nothing is
    ///   fanned out in that case.
    pub async fn send(
        &self,
        sender: &ConnectionHandle,
        session_id: Option<SessionId>,
        content: &str,
    ) -> Result<Message, GatewayError> {
        let content = self.validate(content)?;

        let Some(session_id) = session_id else {
            if sender.role == Role::Admin {
                return Err(RouteError::NotAMember.into());
            }
            let (_, message) = self
                .open_with(
                    &sender.identity,
                    sender.role,
                    GuestProfile {
                        name: sender.display_name.clone(),
                        email: None,
                    },
                    content,
                )
                .await?;
            return Ok(message);
        };

        if !self
            .rooms
            .is_member(&RoomId::Session(session_id), sender.id)
            .await
        {
            tracing::debug!(connection_id = %sender.id, %session_id, "send rejected: not in room");
            return Err(self.outside_room_error(&sender.identity, session_id).await);
        }

        let mut guard = self.lock_visible(session_id).await?;
        if guard.status == SessionStatus::Closed {
            return Err(RouteError::SessionClosed.into());
        }
        if !guard.is_participant(&sender.identity) {
            return Err(RouteError::NotAMember.into());
        }
        self.append(
            &mut guard,
            &sender.identity,
            sender.role,
            content,
            MessageType::Text,
        )
        .await
    }

    /// Opens a session for `guest` with its first message, as the REST
    /// guest entry point does.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send) for content and storage failures;
    /// [`GatewayError::Forbidden`] for admins.
    pub async fn start_session(
        &self,
        guest: &Identity,
        role: Role,
        profile: GuestProfile,
        content: &str,
    ) -> Result<(ChatSession, Message), GatewayError> {
        if role == Role::Admin {
            return Err(GatewayError::Forbidden(
                "admins cannot open support sessions".to_string(),
            ));
        }
        let content = self.validate(content)?;
        self.open_with(guest, role, profile, content).await
    }

    async fn open_with(
        &self,
        guest: &Identity,
        role: Role,
        profile: GuestProfile,
        content: &str,
    ) -> Result<(ChatSession, Message), GatewayError> {
        let store = self.rooms.store();
        let session = store.create_session(guest, &profile).await?;
        let mut guard = self.rooms.open_session(&session).await;

        let room = RoomId::Session(session.id);
        for handle in self.chat_connections_of(guest) {
            self.rooms.join(room.clone(), &handle).await;
        }

        let message = match self
            .append(&mut guard, guest, role, content, MessageType::Text)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                drop(guard);
                self.abandon_open(session.id).await;
                return Err(e);
            }
        };

        let fan_out = self
            .rooms
            .broadcast(
                &RoomId::AdminBroadcast,
                ServerEvent::NewChatRequest {
                    session_id: session.id,
                    guest_summary: GuestSummary::new(guest.clone(), &profile, content),
                },
            )
            .await;
        tracing::info!(
            session_id = %session.id,
            identity = %guest,
            admins_notified = fan_out.queued,
            "support session opened"
        );
        Ok((session, message))
    }

    /// Undoes a session whose opening message could not be stored: closes
    /// it so it never reaches the unassigned queue, empties its room and
    /// forgets its state.
    async fn abandon_open(&self, session_id: SessionId) {
        if let Err(e) = self.rooms.store().close_session(session_id).await {
            tracing::warn!(%session_id, error = %e, "could not close abandoned session");
        }
        self.rooms.dissolve(&RoomId::Session(session_id)).await;
        self.rooms.evict_session(session_id);
        tracing::warn!(%session_id, "session abandoned: opening message not stored");
    }

    /// Claims an unassigned session for an admin.
    ///
    /// Losing the race is `Ok(AlreadyClaimed)`. A first successful claim
    /// appends a system message announcing the admin.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Forbidden`] for non-admins.
    /// - [`GatewayError::SessionNotFound`] for unknown sessions.
    /// - [`RouteError::SessionClosed`] for closed sessions.
    pub async fn claim(
        &self,
        actor: Actor<'_>,
        session_id: SessionId,
    ) -> Result<ClaimOutcome, GatewayError> {
        if actor.role != Role::Admin {
            return Err(GatewayError::Forbidden("only admins can claim".to_string()));
        }
        let mut guard = self.rooms.lock_session(session_id).await?;
        let connections = self.presence.connections_of(actor.identity);
        let outcome = self
            .rooms
            .claim(&mut guard, actor.identity, &connections)
            .await?;

        match &outcome {
            ClaimOutcome::Claimed {
                newly_claimed: true,
            } => {
                tracing::info!(%session_id, admin = %actor.identity, "session claimed");
                let note = format!("{} joined the conversation", actor.label);
                self.append(
                    &mut guard,
                    actor.identity,
                    Role::Admin,
                    &note,
                    MessageType::System,
                )
                .await?;
            }
            ClaimOutcome::Claimed {
                newly_claimed: false,
            } => {}
            ClaimOutcome::AlreadyClaimed { by } => {
                tracing::info!(%session_id, admin = %actor.identity, holder = %by, "claim lost");
            }
        }
        Ok(outcome)
    }

    /// Puts a participant's connection (back) into the session room.
    ///
    /// # Errors
    ///
    /// [`RouteError::NotAMember`] for non-participants and unknown
    /// sessions, [`RouteError::SessionClosed`] for closed ones.
    pub async fn join_session(
        &self,
        handle: &Arc<ConnectionHandle>,
        session_id: SessionId,
    ) -> Result<(), GatewayError> {
        let guard = self.lock_visible(session_id).await?;
        if !guard.is_participant(&handle.identity) {
            return Err(RouteError::NotAMember.into());
        }
        if guard.status == SessionStatus::Closed {
            return Err(RouteError::SessionClosed.into());
        }
        self.rooms.join(RoomId::Session(session_id), handle).await;
        Ok(())
    }

    /// Closes a session on behalf of a participant: appends a system
    /// message, announces the closure and dissolves the room.
    ///
    /// # Errors
    ///
    /// [`RouteError::NotAMember`] for non-participants and unknown
    /// sessions, [`RouteError::SessionClosed`] if already closed.
    pub async fn close_session(
        &self,
        actor: Actor<'_>,
        session_id: SessionId,
    ) -> Result<ChatSession, GatewayError> {
        let mut guard = self.lock_visible(session_id).await?;
        if !guard.is_participant(actor.identity) {
            return Err(RouteError::NotAMember.into());
        }
        if guard.status == SessionStatus::Closed {
            return Err(RouteError::SessionClosed.into());
        }

        let note = format!("{} closed the conversation", actor.label);
        self.append(
            &mut guard,
            actor.identity,
            actor.role,
            &note,
            MessageType::System,
        )
        .await?;

        let session = self.rooms.store().close_session(session_id).await?;
        guard.status = session.status;

        let room = RoomId::Session(session_id);
        self.rooms
            .broadcast(
                &room,
                ServerEvent::SessionClosed {
                    session_id,
                    closed_by: actor.identity.clone(),
                },
            )
            .await;
        let removed = self.rooms.dissolve(&room).await;
        drop(guard);
        self.rooms.evict_session(session_id);

        tracing::info!(%session_id, by = %actor.identity, removed, "session closed");
        Ok(session)
    }

    /// Messages after `after_sequence`, oldest first. Participants only.
    ///
    /// # Errors
    ///
    /// [`RouteError::NotAMember`] for non-participants and unknown
    /// sessions.
    pub async fn history(
        &self,
        identity: &Identity,
        session_id: SessionId,
        after_sequence: u64,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, GatewayError> {
        let store = self.rooms.store();
        let participant = store
            .load_session(session_id)
            .await?
            .is_some_and(|s| s.is_participant(identity));
        if !participant {
            return Err(RouteError::NotAMember.into());
        }
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        store.messages_after(session_id, after_sequence, limit).await
    }

    /// Drops cached session state that nothing is using. Returns how many
    /// sessions were evicted.
    pub async fn sweep_idle_sessions(&self) -> usize {
        self.rooms.sweep_sessions().await
    }

    /// Sessions still waiting for an admin, oldest first.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-admins.
    pub async fn list_unassigned(&self, role: Role) -> Result<Vec<ChatSession>, GatewayError> {
        if role != Role::Admin {
            return Err(GatewayError::Forbidden(
                "only admins can list unassigned sessions".to_string(),
            ));
        }
        self.rooms.store().list_unassigned().await
    }

    fn validate<'c>(&self, content: &'c str) -> Result<&'c str, RouteError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(RouteError::InvalidContent("message is empty".to_string()));
        }
        let len = trimmed.chars().count();
        if len > self.max_message_length {
            return Err(RouteError::InvalidContent(format!(
                "message is {len} characters; limit is {}",
                self.max_message_length
            )));
        }
        Ok(trimmed)
    }

    /// Why a sender outside the session room is refused. Closing dissolves
    /// the room, so participants of a closed session hear `SessionClosed`;
    /// everyone else, including senders to unknown ids, hears `NotAMember`.
    async fn outside_room_error(&self, identity: &Identity, session_id: SessionId) -> GatewayError {
        let Ok(guard) = self.lock_visible(session_id).await else {
            return RouteError::NotAMember.into();
        };
        let closed = guard.status == SessionStatus::Closed;
        let participant = guard.is_participant(identity);
        drop(guard);
        if closed {
            // A closed session never needs its slot again.
            self.rooms.evict_session(session_id);
        }
        if closed && participant {
            RouteError::SessionClosed.into()
        } else {
            RouteError::NotAMember.into()
        }
    }

    /// Locks a session, reporting unknown ids as `NotAMember` so callers
    /// cannot learn whether a session exists.
    async fn lock_visible(&self, session_id: SessionId) -> Result<SessionGuard, GatewayError> {
        match self.rooms.lock_session(session_id).await {
            Err(GatewayError::SessionNotFound(_)) => Err(RouteError::NotAMember.into()),
            other => other,
        }
    }

    fn chat_connections_of(&self, identity: &Identity) -> Vec<Arc<ConnectionHandle>> {
        self.presence
            .connections_of(identity)
            .into_iter()
            .filter(|h| h.namespace == Namespace::Chat)
            .collect()
    }

    async fn append(
        &self,
        guard: &mut SessionGuard,
        sender: &Identity,
        sender_role: Role,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message, GatewayError> {
        let session_id = guard.session_id();
        let message = Message {
            id: MessageId::new(),
            session_id,
            sequence: guard.next_sequence(),
            sender: sender.clone(),
            sender_role,
            content: content.to_string(),
            message_type,
            created_at: Utc::now(),
        };

        self.rooms.store().persist_message(&message).await?;
        guard.commit_sequence(message.sequence);

        let fan_out = self
            .rooms
            .broadcast(
                &RoomId::Session(session_id),
                ServerEvent::ChatMessage {
                    session_id,
                    message: message.clone(),
                },
            )
            .await;
        tracing::debug!(
            %session_id,
            sequence = message.sequence,
            queued = fan_out.queued,
            dropped = fan_out.dropped,
            "message routed"
        );
        Ok(message)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::EventBus;
    use crate::persistence::{ChatStore, InMemoryStore};
    use tokio::sync::mpsc;

    struct Fixture {
        router: Arc<MessageRouter>,
        rooms: Arc<RoomRouter>,
        presence: Arc<PresenceRegistry>,
        store: Arc<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let concrete = Arc::clone(&store);
        let shared: Arc<dyn ChatStore> = concrete;
        let rooms = Arc::new(RoomRouter::new(shared));
        let presence = Arc::new(PresenceRegistry::new(Arc::clone(&rooms), EventBus::new(16)));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&rooms),
            Arc::clone(&presence),
            100,
        ));
        Fixture {
            router,
            rooms,
            presence,
            store,
        }
    }

    async fn connect(
        f: &Fixture,
        identity: &str,
        role: Role,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<Arc<ServerEvent>>) {
        let (handle, rx) =
            ConnectionHandle::new(Identity::new(identity), role, Namespace::Chat, None, 64);
        let handle = Arc::new(handle);
        f.presence.register(Arc::clone(&handle));
        if role == Role::Admin {
            f.rooms.join(RoomId::AdminBroadcast, &handle).await;
        }
        (handle, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<ServerEvent>>) -> Vec<Arc<ServerEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn sequences(events: &[Arc<ServerEvent>]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e.as_ref() {
                ServerEvent::ChatMessage { message, .. } => Some(message.sequence),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn first_guest_message_opens_session_and_alerts_admins() {
        let f = fixture();
        let (guest, mut guest_rx) = connect(&f, "guest-1", Role::Guest).await;
        let (_a1, mut a1_rx) = connect(&f, "admin-1", Role::Admin).await;
        let (_a2, mut a2_rx) = connect(&f, "admin-2", Role::Admin).await;

        let Ok(message) = f.router.send(&guest, None, "  Hello  ").await else {
            panic!("send failed");
        };
        assert_eq!(message.sequence, 1);
        assert_eq!(message.content, "Hello");

        let Ok(Some(session)) = f.store.load_session(message.session_id).await else {
            panic!("session missing");
        };
        assert_eq!(session.status, SessionStatus::Unassigned);

        let guest_events = drain(&mut guest_rx);
        let [event] = guest_events.as_slice() else {
            panic!("guest should see exactly its message");
        };
        let ServerEvent::ChatMessage { message: echoed, .. } = event.as_ref() else {
            panic!("expected chat:message");
        };
        assert_eq!(echoed, &message);

        for rx in [&mut a1_rx, &mut a2_rx] {
            let events = drain(rx);
            assert!(events.iter().any(|e| matches!(
                e.as_ref(),
                ServerEvent::NewChatRequest { session_id, guest_summary }
                    if *session_id == message.session_id && guest_summary.preview == "Hello"
            )));
        }
    }

    #[tokio::test]
    async fn outsider_gets_not_a_member_and_nothing_is_persisted() {
        let f = fixture();
        let (guest, _guest_rx) = connect(&f, "guest-1", Role::Guest).await;
        let (outsider, _rx) = connect(&f, "member-9", Role::Member).await;
        let (admin, _admin_rx) = connect(&f, "admin-1", Role::Admin).await;

        let Ok(first) = f.router.send(&guest, None, "help").await else {
            panic!("send failed");
        };
        let before = f.store.message_count().await;

        for sender in [&outsider, &admin] {
            let result = f
                .router
                .send(sender, Some(first.session_id), "let me in")
                .await;
            assert!(matches!(
                result,
                Err(GatewayError::Route(RouteError::NotAMember))
            ));
        }
        let unknown = f.router.send(&outsider, Some(SessionId::new()), "hi").await;
        assert!(matches!(
            unknown,
            Err(GatewayError::Route(RouteError::NotAMember))
        ));
        assert_eq!(f.store.message_count().await, before);
    }

    #[tokio::test]
    async fn concurrent_senders_get_strictly_increasing_sequences() {
        let f = fixture();
        let (guest, mut guest_rx) = connect(&f, "guest-1", Role::Guest).await;
        let (admin, mut admin_rx) = connect(&f, "admin-1", Role::Admin).await;

        let Ok(first) = f.router.send(&guest, None, "hi").await else {
            panic!("send failed");
        };
        let session_id = first.session_id;
        let Ok(ClaimOutcome::Claimed { .. }) =
            f.router.claim(Actor::from(admin.as_ref()), session_id).await
        else {
            panic!("claim failed");
        };
        drain(&mut guest_rx);
        drain(&mut admin_rx);

        let mut tasks = Vec::new();
        for i in 0..20 {
            let router = Arc::clone(&f.router);
            let sender = if i % 2 == 0 {
                Arc::clone(&guest)
            } else {
                Arc::clone(&admin)
            };
            tasks.push(tokio::spawn(async move {
                router.send(&sender, Some(session_id), &format!("m{i}")).await
            }));
        }
        let mut assigned = Vec::new();
        for task in tasks {
            let Ok(Ok(message)) = task.await else {
                panic!("send task failed");
            };
            assigned.push(message.sequence);
        }
        assigned.sort_unstable();
        let expected: Vec<u64> = (3..23).collect();
        assert_eq!(assigned, expected);

        let guest_seen = sequences(&drain(&mut guest_rx));
        let admin_seen = sequences(&drain(&mut admin_rx));
        assert_eq!(guest_seen, expected);
        assert_eq!(admin_seen, expected);
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner_and_room_holds_only_winner() {
        let f = fixture();
        let (guest, _guest_rx) = connect(&f, "guest-1", Role::Guest).await;
        let Ok(first) = f.router.send(&guest, None, "anyone?").await else {
            panic!("send failed");
        };
        let session_id = first.session_id;

        let mut admins = Vec::new();
        for i in 0..2 {
            let (admin, rx) = connect(&f, &format!("admin-{i}"), Role::Admin).await;
            admins.push((admin, rx));
        }

        let tasks: Vec<_> = admins
            .iter()
            .map(|(admin, _)| {
                let router = Arc::clone(&f.router);
                let admin = Arc::clone(admin);
                tokio::spawn(async move {
                    router
                        .claim(Actor::from(admin.as_ref()), session_id)
                        .await
                        .map(|outcome| (admin.identity.clone(), outcome))
                })
            })
            .collect();

        let mut winners = Vec::new();
        let mut losers = Vec::new();
        for task in tasks {
            let Ok(Ok((who, outcome))) = task.await else {
                panic!("claim task failed");
            };
            match outcome {
                ClaimOutcome::Claimed { .. } => winners.push(who),
                ClaimOutcome::AlreadyClaimed { by } => losers.push(by),
            }
        }
        let [winner] = winners.as_slice() else {
            panic!("expected exactly one winner, got {winners:?}");
        };
        assert_eq!(losers, vec![winner.clone()]);

        let mut members = f.rooms.members(&RoomId::Session(session_id)).await;
        members.sort_by_key(|id| id.to_string());
        let mut expected = vec![guest.id];
        for (admin, _) in &admins {
            if admin.identity == *winner {
                expected.push(admin.id);
            }
        }
        expected.sort_by_key(|id| id.to_string());
        assert_eq!(members, expected);
    }

    #[tokio::test]
    async fn claim_announces_admin_with_system_message() {
        let f = fixture();
        let (guest, mut guest_rx) = connect(&f, "guest-1", Role::Guest).await;
        let (admin, _admin_rx) = connect(&f, "admin-1", Role::Admin).await;
        let Ok(first) = f.router.send(&guest, None, "hi").await else {
            panic!("send failed");
        };
        drain(&mut guest_rx);

        let Ok(ClaimOutcome::Claimed { newly_claimed: true }) =
            f.router.claim(Actor::from(admin.as_ref()), first.session_id).await
        else {
            panic!("claim failed");
        };
        let events = drain(&mut guest_rx);
        let Some(ServerEvent::ChatMessage { message, .. }) = events.first().map(|e| e.as_ref())
        else {
            panic!("expected system message");
        };
        assert_eq!(message.message_type, MessageType::System);
        assert_eq!(message.sequence, 2);
        assert_eq!(message.content, "admin-1 joined the conversation");

        // re-claim is idempotent and silent
        let Ok(ClaimOutcome::Claimed { newly_claimed: false }) =
            f.router.claim(Actor::from(admin.as_ref()), first.session_id).await
        else {
            panic!("re-claim failed");
        };
        assert!(drain(&mut guest_rx).is_empty());
    }

    #[tokio::test]
    async fn non_admin_cannot_claim() {
        let f = fixture();
        let (guest, _rx) = connect(&f, "guest-1", Role::Guest).await;
        let Ok(first) = f.router.send(&guest, None, "hi").await else {
            panic!("send failed");
        };
        let result = f
            .router
            .claim(Actor::from(guest.as_ref()), first.session_id)
            .await;
        assert!(matches!(result, Err(GatewayError::Forbidden(_))));
    }

    #[tokio::test]
    async fn close_rejects_later_messages_and_dissolves_room() {
        let f = fixture();
        let (guest, mut guest_rx) = connect(&f, "guest-1", Role::Guest).await;
        let Ok(first) = f.router.send(&guest, None, "hi").await else {
            panic!("send failed");
        };
        let session_id = first.session_id;
        drain(&mut guest_rx);

        let Ok(closed) = f
            .router
            .close_session(Actor::from(guest.as_ref()), session_id)
            .await
        else {
            panic!("close failed");
        };
        assert_eq!(closed.status, SessionStatus::Closed);

        let events = drain(&mut guest_rx);
        assert!(
            events
                .iter()
                .any(|e| matches!(e.as_ref(), ServerEvent::SessionClosed { .. }))
        );
        assert!(f.rooms.members(&RoomId::Session(session_id)).await.is_empty());

        let before = f.store.message_count().await;
        let after = f.router.send(&guest, Some(session_id), "still there?").await;
        assert!(matches!(
            after,
            Err(GatewayError::Route(RouteError::SessionClosed))
        ));
        assert_eq!(f.store.message_count().await, before);
        let rejoin = f.router.join_session(&guest, session_id).await;
        assert!(matches!(
            rejoin,
            Err(GatewayError::Route(RouteError::SessionClosed))
        ));
    }

    #[tokio::test]
    async fn outsider_sending_into_closed_session_still_gets_not_a_member() {
        let f = fixture();
        let (guest, _guest_rx) = connect(&f, "guest-1", Role::Guest).await;
        let (outsider, _rx) = connect(&f, "member-9", Role::Member).await;
        let Ok(first) = f.router.send(&guest, None, "hi").await else {
            panic!("send failed");
        };
        let session_id = first.session_id;
        let Ok(_) = f
            .router
            .close_session(Actor::from(guest.as_ref()), session_id)
            .await
        else {
            panic!("close failed");
        };
        let before = f.store.message_count().await;

        let result = f.router.send(&outsider, Some(session_id), "hello?").await;
        assert!(matches!(
            result,
            Err(GatewayError::Route(RouteError::NotAMember))
        ));
        assert_eq!(f.store.message_count().await, before);
    }

    /// Stores everything except messages.
    #[derive(Debug)]
    struct MessagelessStore(InMemoryStore);

    #[async_trait::async_trait]
    impl ChatStore for MessagelessStore {
        async fn create_session(
            &self,
            guest: &Identity,
            profile: &GuestProfile,
        ) -> Result<ChatSession, GatewayError> {
            self.0.create_session(guest, profile).await
        }

        async fn load_session(&self, id: SessionId) -> Result<Option<ChatSession>, GatewayError> {
            self.0.load_session(id).await
        }

        async fn cas_claim(
            &self,
            id: SessionId,
            admin: &Identity,
        ) -> Result<crate::persistence::CasClaim, GatewayError> {
            self.0.cas_claim(id, admin).await
        }

        async fn close_session(&self, id: SessionId) -> Result<ChatSession, GatewayError> {
            self.0.close_session(id).await
        }

        async fn last_sequence(&self, id: SessionId) -> Result<u64, GatewayError> {
            self.0.last_sequence(id).await
        }

        async fn persist_message(&self, _message: &Message) -> Result<(), GatewayError> {
            Err(GatewayError::PersistenceError("database down".to_string()))
        }

        async fn messages_after(
            &self,
            id: SessionId,
            after: u64,
            limit: u32,
        ) -> Result<Vec<Message>, GatewayError> {
            self.0.messages_after(id, after, limit).await
        }

        async fn list_unassigned(&self) -> Result<Vec<ChatSession>, GatewayError> {
            self.0.list_unassigned().await
        }

        async fn persist_notification(
            &self,
            event: &crate::domain::NotificationEvent,
        ) -> Result<(), GatewayError> {
            self.0.persist_notification(event).await
        }

        async fn unread_count(&self, user: &Identity) -> Result<u64, GatewayError> {
            self.0.unread_count(user).await
        }

        async fn mark_read(
            &self,
            user: &Identity,
            id: crate::domain::NotificationId,
        ) -> Result<bool, GatewayError> {
            self.0.mark_read(user, id).await
        }
    }

    #[tokio::test]
    async fn failed_opening_message_leaves_no_session_behind() {
        let store: Arc<dyn ChatStore> = Arc::new(MessagelessStore(InMemoryStore::new()));
        let rooms = Arc::new(RoomRouter::new(Arc::clone(&store)));
        let presence = Arc::new(PresenceRegistry::new(Arc::clone(&rooms), EventBus::new(16)));
        let router = MessageRouter::new(Arc::clone(&rooms), Arc::clone(&presence), 100);
        let (handle, mut rx) =
            ConnectionHandle::new(Identity::new("guest-1"), Role::Guest, Namespace::Chat, None, 64);
        let guest = Arc::new(handle);
        presence.register(Arc::clone(&guest));

        let result = router.send(&guest, None, "hello").await;
        assert!(matches!(result, Err(GatewayError::PersistenceError(_))));

        let Ok(waiting) = store.list_unassigned().await else {
            panic!("list failed");
        };
        assert!(waiting.is_empty());
        assert!(guest.rooms().await.is_empty());
        assert_eq!(rooms.cached_sessions(), 0);
        assert!(sequences(&drain(&mut rx)).is_empty());
    }

    #[tokio::test]
    async fn content_is_validated_before_anything_else() {
        let f = fixture();
        let (guest, _rx) = connect(&f, "guest-1", Role::Guest).await;
        let empty = f.router.send(&guest, None, "   ").await;
        assert!(matches!(
            empty,
            Err(GatewayError::Route(RouteError::InvalidContent(_)))
        ));
        let long = "x".repeat(101);
        let too_long = f.router.send(&guest, None, &long).await;
        assert!(matches!(
            too_long,
            Err(GatewayError::Route(RouteError::InvalidContent(_)))
        ));
        assert_eq!(f.store.message_count().await, 0);
    }

    #[tokio::test]
    async fn rejoin_after_reconnect_restores_delivery() {
        let f = fixture();
        let (guest, _rx) = connect(&f, "guest-1", Role::Guest).await;
        let Ok(first) = f.router.send(&guest, None, "hi").await else {
            panic!("send failed");
        };
        f.presence.unregister(guest.id).await;

        let (again, mut again_rx) = connect(&f, "guest-1", Role::Guest).await;
        assert!(
            f.router
                .join_session(&again, first.session_id)
                .await
                .is_ok()
        );
        let Ok(second) = f.router.send(&again, Some(first.session_id), "back").await else {
            panic!("send after rejoin failed");
        };
        assert_eq!(second.sequence, 2);
        assert_eq!(sequences(&drain(&mut again_rx)), vec![2]);
    }

    #[tokio::test]
    async fn history_is_for_participants_only() {
        let f = fixture();
        let (guest, _rx) = connect(&f, "guest-1", Role::Guest).await;
        let Ok(first) = f.router.send(&guest, None, "one").await else {
            panic!("send failed");
        };
        let Ok(_) = f.router.send(&guest, Some(first.session_id), "two").await else {
            panic!("send failed");
        };

        let Ok(all) = f
            .router
            .history(&guest.identity, first.session_id, 0, None)
            .await
        else {
            panic!("history failed");
        };
        assert_eq!(all.len(), 2);
        let Ok(tail) = f
            .router
            .history(&guest.identity, first.session_id, 1, None)
            .await
        else {
            panic!("history failed");
        };
        assert_eq!(tail.iter().map(|m| m.sequence).collect::<Vec<_>>(), vec![2]);

        let outsider = f
            .router
            .history(&Identity::new("member-9"), first.session_id, 0, None)
            .await;
        assert!(matches!(
            outsider,
            Err(GatewayError::Route(RouteError::NotAMember))
        ));
    }

    #[tokio::test]
    async fn list_unassigned_is_admin_only() {
        let f = fixture();
        let (guest, _rx) = connect(&f, "guest-1", Role::Guest).await;
        let Ok(_) = f.router.send(&guest, None, "hi").await else {
            panic!("send failed");
        };
        let Ok(open) = f.router.list_unassigned(Role::Admin).await else {
            panic!("list failed");
        };
        assert_eq!(open.len(), 1);
        assert!(matches!(
            f.router.list_unassigned(Role::Member).await,
            Err(GatewayError::Forbidden(_))
        ));
    }
}
