//! Persistence layer: the durable source of truth for sessions, messages
//! and notifications.
//!
//! The gateway talks to storage only through [`ChatStore`]. Two
//! implementations ship with the crate: [`InMemoryStore`] for development
//! and tests, and [`PostgresStore`] backed by `sqlx::PgPool`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{
    ChatSession, GuestProfile, Identity, Message, NotificationEvent, NotificationId, SessionId,
};
use crate::error::GatewayError;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Result of a compare-and-swap claim attempt.
#[derive(Debug, Clone)]
pub enum CasClaim {
    /// The claim field was unset and now names the requester.
    Won(ChatSession),
    /// The session was already claimed or closed; returned as stored.
    Lost(ChatSession),
}

/// Durable storage collaborator.
///
/// Implementations must make [`ChatStore::cas_claim`] atomic: of any set of
/// concurrent attempts on one session, at most one returns [`CasClaim::Won`].
#[async_trait]
pub trait ChatStore: Send + Sync + std::fmt::Debug {
    /// Creates a new unassigned session for `guest`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn create_session(
        &self,
        guest: &Identity,
        profile: &GuestProfile,
    ) -> Result<ChatSession, GatewayError>;

    /// Loads a session by id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn load_session(&self, id: SessionId) -> Result<Option<ChatSession>, GatewayError>;

    /// Sets `claimed_by = admin` and `status = assigned` iff the session is
    /// unassigned and unclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SessionNotFound`] for unknown sessions and
    /// [`GatewayError::PersistenceError`] on storage failure.
    async fn cas_claim(&self, id: SessionId, admin: &Identity) -> Result<CasClaim, GatewayError>;

    /// Moves the session to `closed`. Closing a closed session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SessionNotFound`] for unknown sessions and
    /// [`GatewayError::PersistenceError`] on storage failure.
    async fn close_session(&self, id: SessionId) -> Result<ChatSession, GatewayError>;

    /// Highest sequence number stored for the session, `0` if none.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn last_sequence(&self, id: SessionId) -> Result<u64, GatewayError>;

    /// Durably records a message and bumps the session's activity time.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure,
    /// including a duplicate `(session_id, sequence)`.
    async fn persist_message(&self, message: &Message) -> Result<(), GatewayError>;

    /// Messages with `sequence > after`, ascending, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn messages_after(
        &self,
        id: SessionId,
        after: u64,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError>;

    /// Sessions still waiting for a claim, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn list_unassigned(&self) -> Result<Vec<ChatSession>, GatewayError>;

    /// Durably records a notification.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn persist_notification(&self, event: &NotificationEvent) -> Result<(), GatewayError>;

    /// Number of unread notifications for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn unread_count(&self, user: &Identity) -> Result<u64, GatewayError>;

    /// Marks one of `user`'s notifications read. Returns `true` only if an
    /// unread event owned by `user` changed state.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn mark_read(&self, user: &Identity, id: NotificationId) -> Result<bool, GatewayError>;
}
