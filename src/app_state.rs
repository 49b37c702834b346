//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::domain::{EventBus, PresenceRegistry, RoomRouter};
use crate::persistence::ChatStore;
use crate::reconnect::ConnectRateLimiter;
use crate::service::{ConnectionGateway, MessageRouter, NotificationDispatcher};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handshake and teardown.
    pub gateway: Arc<ConnectionGateway>,
    /// Chat command routing.
    pub messages: Arc<MessageRouter>,
    /// Per-user notifications.
    pub notifications: NotificationDispatcher,
    /// Bearer verification for REST endpoints.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Live connection index.
    pub presence: Arc<PresenceRegistry>,
    /// Presence change stream for diagnostic connections.
    pub event_bus: EventBus,
}

impl AppState {
    /// Wires the registries and services over `store` and `verifier`.
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn ChatStore>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let rooms = Arc::new(RoomRouter::new(store));
        let presence = Arc::new(PresenceRegistry::new(
            Arc::clone(&rooms),
            event_bus.clone(),
        ));

        let gateway = Arc::new(ConnectionGateway::new(
            Arc::clone(&verifier),
            Arc::clone(&presence),
            Arc::clone(&rooms),
            ConnectRateLimiter::new(
                config.connect_rate_limit_max,
                config.connect_rate_limit_window(),
            ),
            config.outbound_queue_capacity,
        ));
        let messages = Arc::new(MessageRouter::new(
            Arc::clone(&rooms),
            Arc::clone(&presence),
            config.max_message_length,
        ));
        let notifications = NotificationDispatcher::new(rooms);

        Self {
            gateway,
            messages,
            notifications,
            verifier,
            presence,
            event_bus,
        }
    }
}
