//! In-process [`ChatStore`] used when persistence is disabled and in tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{CasClaim, ChatStore};
use crate::domain::{
    ChatSession, GuestProfile, Identity, Message, NotificationEvent, NotificationId, SessionId,
    SessionStatus,
};
use crate::error::GatewayError;

/// Map-backed store. Each collection sits behind its own lock.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<SessionId, ChatSession>>,
    messages: RwLock<HashMap<SessionId, BTreeMap<u64, Message>>>,
    notifications: RwLock<HashMap<NotificationId, NotificationEvent>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages across all sessions.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn create_session(
        &self,
        guest: &Identity,
        profile: &GuestProfile,
    ) -> Result<ChatSession, GatewayError> {
        let session = ChatSession::new(guest.clone(), profile.clone());
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<ChatSession>, GatewayError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn cas_claim(&self, id: SessionId, admin: &Identity) -> Result<CasClaim, GatewayError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(GatewayError::SessionNotFound(id))?;
        if session.status != SessionStatus::Unassigned || session.claimed_by.is_some() {
            return Ok(CasClaim::Lost(session.clone()));
        }
        session.status = SessionStatus::Assigned;
        session.claimed_by = Some(admin.clone());
        session.last_activity_at = Utc::now();
        Ok(CasClaim::Won(session.clone()))
    }

    async fn close_session(&self, id: SessionId) -> Result<ChatSession, GatewayError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(GatewayError::SessionNotFound(id))?;
        if session.status.can_transition_to(SessionStatus::Closed) {
            session.status = SessionStatus::Closed;
            session.last_activity_at = Utc::now();
        }
        Ok(session.clone())
    }

    async fn last_sequence(&self, id: SessionId) -> Result<u64, GatewayError> {
        Ok(self
            .messages
            .read()
            .await
            .get(&id)
            .and_then(|log| log.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn persist_message(&self, message: &Message) -> Result<(), GatewayError> {
        {
            let mut messages = self.messages.write().await;
            let log = messages.entry(message.session_id).or_default();
            if log.contains_key(&message.sequence) {
                return Err(GatewayError::PersistenceError(format!(
                    "duplicate sequence {} in session {}",
                    message.sequence, message.session_id
                )));
            }
            log.insert(message.sequence, message.clone());
        }
        if let Some(session) = self.sessions.write().await.get_mut(&message.session_id) {
            session.last_activity_at = message.created_at;
        }
        Ok(())
    }

    async fn messages_after(
        &self,
        id: SessionId,
        after: u64,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError> {
        let messages = self.messages.read().await;
        let Some(log) = messages.get(&id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .range(after.saturating_add(1)..)
            .take(limit as usize)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn list_unassigned(&self) -> Result<Vec<ChatSession>, GatewayError> {
        let mut pending: Vec<ChatSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status == SessionStatus::Unassigned)
            .cloned()
            .collect();
        pending.sort_by_key(|s| s.created_at);
        Ok(pending)
    }

    async fn persist_notification(&self, event: &NotificationEvent) -> Result<(), GatewayError> {
        self.notifications
            .write()
            .await
            .insert(event.id, event.clone());
        Ok(())
    }

    async fn unread_count(&self, user: &Identity) -> Result<u64, GatewayError> {
        let count = self
            .notifications
            .read()
            .await
            .values()
            .filter(|n| n.user == *user && n.is_unread())
            .count();
        Ok(count as u64)
    }

    async fn mark_read(&self, user: &Identity, id: NotificationId) -> Result<bool, GatewayError> {
        let mut notifications = self.notifications.write().await;
        match notifications.get_mut(&id) {
            Some(event) if event.user == *user && event.is_unread() => {
                event.read_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, MessageType, Role};

    fn message(session_id: SessionId, sequence: u64) -> Message {
        Message {
            id: MessageId::new(),
            session_id,
            sequence,
            sender: Identity::new("guest"),
            sender_role: Role::Guest,
            content: format!("m{sequence}"),
            message_type: MessageType::Text,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cas_claim_has_single_winner() {
        let store = InMemoryStore::new();
        let Ok(session) = store
            .create_session(&Identity::new("guest"), &GuestProfile::default())
            .await
        else {
            panic!("create failed");
        };

        let first = store.cas_claim(session.id, &Identity::new("a")).await;
        let second = store.cas_claim(session.id, &Identity::new("b")).await;
        let Ok(CasClaim::Won(won)) = first else {
            panic!("first claim should win");
        };
        let Ok(CasClaim::Lost(lost)) = second else {
            panic!("second claim should lose");
        };
        assert_eq!(won.status, SessionStatus::Assigned);
        assert_eq!(lost.claimed_by, Some(Identity::new("a")));
    }

    #[tokio::test]
    async fn cas_claim_unknown_session_is_not_found() {
        let store = InMemoryStore::new();
        let result = store.cas_claim(SessionId::new(), &Identity::new("a")).await;
        assert!(matches!(result, Err(GatewayError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn closed_session_cannot_be_claimed_or_reopened() {
        let store = InMemoryStore::new();
        let Ok(session) = store
            .create_session(&Identity::new("guest"), &GuestProfile::default())
            .await
        else {
            panic!("create failed");
        };
        let _ = store.close_session(session.id).await;
        let Ok(CasClaim::Lost(lost)) = store.cas_claim(session.id, &Identity::new("a")).await else {
            panic!("claim on closed session must lose");
        };
        assert_eq!(lost.status, SessionStatus::Closed);
        assert!(lost.claimed_by.is_none());
    }

    #[tokio::test]
    async fn duplicate_sequence_is_rejected() {
        let store = InMemoryStore::new();
        let session_id = SessionId::new();
        assert!(store.persist_message(&message(session_id, 1)).await.is_ok());
        assert!(store.persist_message(&message(session_id, 1)).await.is_err());
        assert_eq!(store.last_sequence(session_id).await.unwrap_or(0), 1);
    }

    #[tokio::test]
    async fn messages_after_is_ordered_and_limited() {
        let store = InMemoryStore::new();
        let session_id = SessionId::new();
        for seq in [3, 1, 2, 4] {
            let _ = store.persist_message(&message(session_id, seq)).await;
        }
        let Ok(page) = store.messages_after(session_id, 1, 2).await else {
            panic!("query failed");
        };
        let seqs: Vec<u64> = page.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn mark_read_only_affects_owner_once() {
        let store = InMemoryStore::new();
        let event = NotificationEvent::new(Identity::new("u1"), "ping", serde_json::json!({}));
        let _ = store.persist_notification(&event).await;

        assert!(!store.mark_read(&Identity::new("u2"), event.id).await.unwrap_or(true));
        assert!(store.mark_read(&Identity::new("u1"), event.id).await.unwrap_or(false));
        assert!(!store.mark_read(&Identity::new("u1"), event.id).await.unwrap_or(true));
        assert_eq!(store.unread_count(&Identity::new("u1")).await.unwrap_or(99), 0);
    }
}
