//! Handshake and teardown of persistent connections.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::TokenVerifier;
use crate::domain::{
    ConnectionHandle, ConnectionId, Identity, Namespace, PresenceRegistry, Role, RoomId,
    RoomRouter, ServerEvent,
};
use crate::error::AuthError;
use crate::reconnect::ConnectRateLimiter;

/// A connection that passed the handshake.
#[derive(Debug)]
pub struct Connected {
    /// Shared handle, registered for fan-out unless diagnostic.
    pub handle: Arc<ConnectionHandle>,
    /// Receiving end of the handle's outbound queue.
    pub outbound: mpsc::Receiver<Arc<ServerEvent>>,
}

/// Authenticates connections and wires them into presence and rooms.
///
/// A failed handshake never touches the presence registry or any room.
#[derive(Debug)]
pub struct ConnectionGateway {
    verifier: Arc<dyn TokenVerifier>,
    presence: Arc<PresenceRegistry>,
    rooms: Arc<RoomRouter>,
    limiter: ConnectRateLimiter,
    queue_capacity: usize,
}

impl ConnectionGateway {
    /// Creates a gateway.
    #[must_use]
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        presence: Arc<PresenceRegistry>,
        rooms: Arc<RoomRouter>,
        limiter: ConnectRateLimiter,
        queue_capacity: usize,
    ) -> Self {
        Self {
            verifier,
            presence,
            rooms,
            limiter,
            queue_capacity,
        }
    }

    /// Runs the handshake for `namespace`.
    ///
    /// Chat and notification connections need a credential; on success the
    /// handle is registered and joins its owner's user room, and admin chat
    /// connections also join `admin:broadcast`. Diagnostic connections are
    /// anonymous and join nothing.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RateLimited`] when the peer address or identity is
    ///   over its connect budget.
    /// - [`AuthError::NoCredential`] when a required credential is missing.
    /// - [`AuthError::InvalidOrExpired`] when the verifier rejects it.
    pub async fn connect(
        &self,
        namespace: Namespace,
        credential: Option<&str>,
        peer: Option<IpAddr>,
    ) -> Result<Connected, AuthError> {
        if let Some(ip) = peer {
            self.check_rate(&format!("ip:{ip}"))?;
        }

        if !namespace.requires_credential() {
            let (handle, outbound) = ConnectionHandle::new(
                Identity::anonymous(),
                Role::Guest,
                namespace,
                None,
                self.queue_capacity,
            );
            tracing::debug!(connection_id = %handle.id, %namespace, "diagnostic connection accepted");
            return Ok(Connected {
                handle: Arc::new(handle),
                outbound,
            });
        }

        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::NoCredential)?;
        let verified = self.verifier.verify(credential).map_err(|e| {
            tracing::warn!(%namespace, error = %e, "handshake rejected");
            AuthError::InvalidOrExpired
        })?;
        self.check_rate(&format!("id:{}", verified.identity))?;

        let (handle, outbound) = ConnectionHandle::new(
            verified.identity,
            verified.role,
            namespace,
            verified.display_name,
            self.queue_capacity,
        );
        let handle = Arc::new(handle);
        self.presence.register(Arc::clone(&handle));

        self.rooms
            .join(RoomId::User(handle.identity.clone()), &handle)
            .await;
        if handle.is_admin() && namespace == Namespace::Chat {
            self.rooms.join(RoomId::AdminBroadcast, &handle).await;
        }

        tracing::info!(
            connection_id = %handle.id,
            identity = %handle.identity,
            role = %handle.role,
            %namespace,
            "connection established"
        );
        Ok(Connected { handle, outbound })
    }

    /// Tears a connection down. Safe to call any number of times.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        if let Some(handle) = self.presence.unregister(connection_id).await {
            tracing::info!(
                %connection_id,
                identity = %handle.identity,
                namespace = %handle.namespace,
                "connection closed"
            );
        }
    }

    /// Drops stale rate-limit entries.
    pub fn sweep_rate_limits(&self) -> usize {
        self.limiter.sweep()
    }

    fn check_rate(&self, key: &str) -> Result<(), AuthError> {
        self.limiter.check(key).map_err(|retry_after| {
            tracing::warn!(key, ?retry_after, "connect rate limit exceeded");
            AuthError::RateLimited {
                retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::JwtVerifier;
    use crate::auth::jwt::tests::{SECRET, sign};
    use crate::domain::EventBus;
    use crate::persistence::InMemoryStore;
    use std::time::Duration;

    struct Fixture {
        gateway: ConnectionGateway,
        presence: Arc<PresenceRegistry>,
        rooms: Arc<RoomRouter>,
    }

    fn fixture(rate_limit: u32) -> Fixture {
        let rooms = Arc::new(RoomRouter::new(Arc::new(InMemoryStore::new())));
        let presence = Arc::new(PresenceRegistry::new(Arc::clone(&rooms), EventBus::new(16)));
        let gateway = ConnectionGateway::new(
            Arc::new(JwtVerifier::new(SECRET, 0)),
            Arc::clone(&presence),
            Arc::clone(&rooms),
            ConnectRateLimiter::new(rate_limit, Duration::from_secs(60)),
            8,
        );
        Fixture {
            gateway,
            presence,
            rooms,
        }
    }

    #[tokio::test]
    async fn missing_and_invalid_credentials_are_distinguished() {
        let f = fixture(0);
        for ns in [Namespace::Chat, Namespace::Notifications] {
            let missing = f.gateway.connect(ns, None, None).await;
            assert!(matches!(missing, Err(AuthError::NoCredential)));

            let blank = f.gateway.connect(ns, Some("  "), None).await;
            assert!(matches!(blank, Err(AuthError::NoCredential)));

            let expired = sign("ann", "member", -600, SECRET);
            let rejected = f.gateway.connect(ns, Some(&expired), None).await;
            assert!(matches!(rejected, Err(AuthError::InvalidOrExpired)));

            let tampered = format!("{}x", sign("ann", "member", 600, SECRET));
            let rejected = f.gateway.connect(ns, Some(&tampered), None).await;
            assert!(matches!(rejected, Err(AuthError::InvalidOrExpired)));
        }
        assert!(f.presence.is_empty());
        assert_eq!(f.rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn diagnostic_needs_no_credential_and_joins_nothing() {
        let f = fixture(0);
        let Ok(conn) = f.gateway.connect(Namespace::Diagnostic, None, None).await else {
            panic!("diagnostic connect failed");
        };
        assert_eq!(conn.handle.namespace, Namespace::Diagnostic);
        assert!(f.presence.is_empty());
        assert!(conn.handle.rooms().await.is_empty());
    }

    #[tokio::test]
    async fn admin_chat_connection_joins_user_and_broadcast_rooms() {
        let f = fixture(0);
        let token = sign("alice", "admin", 600, SECRET);
        let Ok(conn) = f.gateway.connect(Namespace::Chat, Some(&token), None).await else {
            panic!("connect failed");
        };
        let alice = Identity::new("alice");
        assert!(f.presence.is_online(&alice));
        assert!(
            f.rooms
                .is_member(&RoomId::User(alice.clone()), conn.handle.id)
                .await
        );
        assert!(f.rooms.is_member(&RoomId::AdminBroadcast, conn.handle.id).await);

        f.gateway.disconnect(conn.handle.id).await;
        f.gateway.disconnect(conn.handle.id).await;
        assert!(!f.presence.is_online(&alice));
        assert!(f.rooms.members(&RoomId::AdminBroadcast).await.is_empty());
    }

    #[tokio::test]
    async fn member_notifications_connection_skips_admin_room() {
        let f = fixture(0);
        let token = sign("bob", "member", 600, SECRET);
        let Ok(conn) = f
            .gateway
            .connect(Namespace::Notifications, Some(&token), None)
            .await
        else {
            panic!("connect failed");
        };
        assert_eq!(conn.handle.rooms().await, vec![RoomId::User(Identity::new("bob"))]);
    }

    #[tokio::test]
    async fn rate_limit_is_reported_distinctly() {
        let f = fixture(2);
        let ip: IpAddr = [10, 0, 0, 7].into();
        let token = sign("bob", "member", 600, SECRET);
        for _ in 0..2 {
            assert!(
                f.gateway
                    .connect(Namespace::Chat, Some(&token), Some(ip))
                    .await
                    .is_ok()
            );
        }
        let third = f.gateway.connect(Namespace::Chat, Some(&token), Some(ip)).await;
        let Err(AuthError::RateLimited { retry_after_ms }) = third else {
            panic!("expected rate limit");
        };
        assert!(retry_after_ms > 0);
    }
}
