//! # huddle-gateway
//!
//! Real-time gateway for a task-management suite: guest-to-admin support
//! chat and per-user notification delivery over WebSocket, plus a small
//! REST surface for history recovery and unread-count reconciliation.
//!
//! Token issuing and durable storage live elsewhere. The gateway verifies
//! bearer tokens it is handed and talks to storage only through
//! [`persistence::ChatStore`].
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket /ws/{chat,notifications,diagnostic}, HTTP /api/v1)
//!     │
//!     ├── WS handshake + loop (ws/)      REST handlers (api/)
//!     │
//!     ├── ConnectionGateway  MessageRouter  NotificationDispatcher (service/)
//!     │
//!     ├── PresenceRegistry  RoomRouter  EventBus (domain/)
//!     │
//!     └── ChatStore: in-memory or PostgreSQL (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod reconnect;
pub mod service;
pub mod ws;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Upper bound on producing an HTTP response. WebSocket upgrades answer
/// immediately, so long-lived sockets are unaffected.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Assembles the full HTTP application: REST routes, the namespaced
/// WebSocket endpoint and the tracing, CORS and timeout layers.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`;
/// the WebSocket handler reads the peer address for rate limiting.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(api::build_router())
        .route("/ws/{namespace}", get(ws::handler::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(request_timeout(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}

/// Answers `408 Request Timeout` when a handler runs past `limit`.
fn request_timeout(limit: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, limit)
}
