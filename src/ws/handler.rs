//! Axum WebSocket upgrade handler.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::connection::run_connection;
use crate::api::bearer_token;
use crate::app_state::AppState;
use crate::domain::Namespace;
use crate::error::GatewayError;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Credential for clients that cannot set headers on the upgrade.
    pub token: Option<String>,
}

/// `GET /ws/{namespace}`: Upgrade to a WebSocket on `chat`,
/// `notifications` or `diagnostic`.
///
/// The credential comes from `Authorization: Bearer` or `?token=`. It is
/// checked after the upgrade so a rejection can be reported as a
/// `connect_error` frame with a distinguishing close code.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(namespace): Path<String>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let namespace = match namespace.parse::<Namespace>() {
        Ok(namespace) => namespace,
        Err(e) => return GatewayError::InvalidRequest(e).into_response(),
    };
    let credential = bearer_token(&headers)
        .map(str::to_string)
        .or(params.token);

    ws.on_upgrade(move |socket| {
        run_connection(socket, state, namespace, credential, Some(peer.ip()))
    })
}
