//! Per-connection WebSocket task.
//!
//! Runs the handshake, then a `select!` loop over inbound frames, the
//! connection's outbound queue and, for diagnostic connections, the
//! presence bus. Whatever ends the loop, the connection is torn down
//! through the gateway exactly once.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use super::messages::{
    ChatCommand, ClaimReply, ClientCommand, DiagnosticCommand, NotificationCommand, ServerFrame,
    parse_inbound,
};
use crate::app_state::AppState;
use crate::domain::{ClaimOutcome, ConnectionHandle, Namespace, PresenceEvent};
use crate::error::GatewayError;
use crate::service::{Actor, Connected};

type WsSink = SplitSink<WebSocket, Message>;

/// What a successfully handled command sends back.
enum Answer {
    Reply(Value),
    Pong(Option<String>),
}

/// Handshakes and serves one socket until either side goes away.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    namespace: Namespace,
    credential: Option<String>,
    peer: Option<IpAddr>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Connected {
        handle,
        mut outbound,
    } = match state
        .gateway
        .connect(namespace, credential.as_deref(), peer)
        .await
    {
        Ok(connected) => connected,
        Err(err) => {
            let frame = ServerFrame::ConnectError {
                reason: err.reason().to_string(),
                retry_after_ms: err.retry_after_ms(),
            };
            if send_json(&mut ws_tx, &frame).await {
                let close = CloseFrame {
                    code: err.close_code(),
                    reason: err.reason().into(),
                };
                let _ = ws_tx.send(Message::Close(Some(close))).await;
            }
            return;
        }
    };

    let hello = ServerFrame::Connected {
        connection_id: handle.id,
        identity: handle.identity.clone(),
        role: handle.role,
        namespace,
    };
    let mut presence_rx = (namespace == Namespace::Diagnostic).then(|| state.event_bus.subscribe());

    if send_json(&mut ws_tx, &hello).await {
        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let frame = handle_text(&state, &handle, text.as_str()).await;
                            if !send_json(&mut ws_tx, &frame).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    }
                }
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    if !send_json(&mut ws_tx, event.as_ref()).await {
                        break;
                    }
                }
                presence = next_presence(&mut presence_rx) => {
                    match presence {
                        Ok(event) => {
                            if !send_json(&mut ws_tx, &event.to_server_event()).await {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(connection_id = %handle.id, lagged = n, "diagnostic client lagged behind presence bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => presence_rx = None,
                    }
                }
            }
        }
    }

    state.gateway.disconnect(handle.id).await;
    tracing::debug!(connection_id = %handle.id, "ws connection closed");
}

async fn next_presence(
    rx: &mut Option<broadcast::Receiver<PresenceEvent>>,
) -> Result<PresenceEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Serializes and sends one frame. Returns `false` if the socket is gone.
async fn send_json<T: Serialize + ?Sized>(ws_tx: &mut WsSink, frame: &T) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => ws_tx.send(Message::text(json)).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize frame");
            true
        }
    }
}

async fn handle_text(state: &AppState, handle: &Arc<ConnectionHandle>, text: &str) -> ServerFrame {
    let inbound = match parse_inbound(handle.namespace, text) {
        Ok(inbound) => inbound,
        Err(rejected) => {
            tracing::debug!(connection_id = %handle.id, reason = %rejected.message, "rejected frame");
            return ServerFrame::from_rejected(rejected);
        }
    };

    match dispatch(state, handle, inbound.command).await {
        Ok(Answer::Reply(data)) => ServerFrame::Reply {
            reference: inbound.reference,
            data,
        },
        Ok(Answer::Pong(nonce)) => ServerFrame::Pong {
            reference: inbound.reference,
            nonce,
        },
        Err(err) => {
            tracing::debug!(connection_id = %handle.id, error = %err, "command failed");
            ServerFrame::from_error(inbound.reference, &err)
        }
    }
}

async fn dispatch(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    command: ClientCommand,
) -> Result<Answer, GatewayError> {
    let data = match command {
        ClientCommand::Chat(command) => chat(state, handle, command).await?,
        ClientCommand::Notifications(NotificationCommand::GetUnreadCount) => {
            let count = state.notifications.unread_count(&handle.identity).await?;
            json!({ "count": count })
        }
        ClientCommand::Notifications(NotificationCommand::MarkRead { event_id }) => {
            let changed = state
                .notifications
                .mark_read(&handle.identity, event_id)
                .await?;
            json!({ "event_id": event_id, "changed": changed })
        }
        ClientCommand::Diagnostic(DiagnosticCommand::Ping { nonce }) => {
            return Ok(Answer::Pong(nonce));
        }
    };
    Ok(Answer::Reply(data))
}

async fn chat(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    command: ChatCommand,
) -> Result<Value, GatewayError> {
    let router = &state.messages;
    let actor = Actor::from(handle.as_ref());
    let data = match command {
        ChatCommand::SendMessage {
            session_id,
            content,
        } => {
            let message = router.send(handle, session_id, &content).await?;
            json!({ "message": message })
        }
        ChatCommand::Claim { session_id } => {
            let reply = match router.claim(actor, session_id).await? {
                ClaimOutcome::Claimed { .. } => ClaimReply::Claimed { session_id },
                ClaimOutcome::AlreadyClaimed { by } => ClaimReply::AlreadyClaimed {
                    session_id,
                    claimed_by: by,
                },
            };
            to_value(&reply)?
        }
        ChatCommand::Join { session_id } => {
            router.join_session(handle, session_id).await?;
            json!({ "session_id": session_id, "joined": true })
        }
        ChatCommand::Close { session_id } => {
            let session = router.close_session(actor, session_id).await?;
            json!({ "session": session })
        }
        ChatCommand::History {
            session_id,
            after_sequence,
            limit,
        } => {
            let messages = router
                .history(&handle.identity, session_id, after_sequence, limit)
                .await?;
            json!({ "session_id": session_id, "messages": messages })
        }
        ChatCommand::ListUnassigned => {
            let sessions = router.list_unassigned(handle.role).await?;
            json!({ "sessions": sessions })
        }
    };
    Ok(data)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::Internal(e.to_string()))
}
