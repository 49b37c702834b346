//! Per-user notification delivery and unread reconciliation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::{Identity, NotificationEvent, NotificationId, RoomId, RoomRouter, ServerEvent};
use crate::error::GatewayError;

/// Persists notifications and pushes them to the recipient's user room.
///
/// Live delivery is best effort; [`unread_count`](Self::unread_count)
/// reads the store, so a client that missed pushes while offline can
/// reconcile on reconnect.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    rooms: Arc<RoomRouter>,
    refresh_version: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(rooms: Arc<RoomRouter>) -> Self {
        Self {
            rooms,
            refresh_version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stores a notification, then delivers it and the refreshed unread
    /// count to every notifications connection of `target`.
    ///
    /// Returns after the event is durable and the refreshed count has been
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the event could not be
    /// stored. Nothing is delivered in that case.
    pub async fn push(
        &self,
        target: &Identity,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<NotificationEvent, GatewayError> {
        let event = NotificationEvent::new(target.clone(), kind, payload);
        self.rooms.store().persist_notification(&event).await?;

        let fan_out = self
            .rooms
            .broadcast(
                &RoomId::User(target.clone()),
                ServerEvent::NotificationPushed {
                    notification: event.clone(),
                },
            )
            .await;
        tracing::debug!(
            notification_id = %event.id,
            identity = %target,
            queued = fan_out.queued,
            "notification pushed"
        );

        self.push_unread_count(target).await;
        Ok(event)
    }

    /// Unread notifications of `identity`, read from the store.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn unread_count(&self, identity: &Identity) -> Result<u64, GatewayError> {
        self.rooms.store().unread_count(identity).await
    }

    /// Marks a notification read. Unknown, foreign and already-read ids are
    /// a no-op. Returns `true` if something changed, in which case the new
    /// count is pushed to the user's devices.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn mark_read(
        &self,
        identity: &Identity,
        id: NotificationId,
    ) -> Result<bool, GatewayError> {
        let changed = self.rooms.store().mark_read(identity, id).await?;
        if changed {
            self.push_unread_count(identity).await;
        }
        Ok(changed)
    }

    /// Reads the count and pushes it with a fresh version. The version is
    /// taken before the read, so a refresh that reads later state never
    /// carries a lower version than one that read earlier state and
    /// finished last.
    async fn push_unread_count(&self, identity: &Identity) {
        let version = self.refresh_version.fetch_add(1, Ordering::SeqCst) + 1;
        match self.unread_count(identity).await {
            Ok(count) => {
                self.rooms
                    .broadcast(
                        &RoomId::User(identity.clone()),
                        ServerEvent::UnreadCount { count, version },
                    )
                    .await;
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "unread count refresh failed");
            }
        }
    }
}
