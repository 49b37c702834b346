//! Support chat handlers: guest entry point and history recovery.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::auth::AuthUser;
use crate::api::dto::{CreateSessionRequest, CreateSessionResponse, HistoryParams, HistoryResponse};
use crate::app_state::AppState;
use crate::domain::{GuestProfile, SessionId};
use crate::error::{ErrorResponse, GatewayError};

/// `POST /support/sessions`: Open a support session with a first message.
///
/// The caller's chat connections, if any, join the new session room and
/// every connected admin is alerted.
///
/// # Errors
///
/// Returns [`GatewayError`] for invalid content, admin callers, missing
/// or rejected credentials, and storage failures.
#[utoipa::path(
    post,
    path = "/api/v1/support/sessions",
    tag = "Support",
    summary = "Open a support session",
    description = "Creates an unassigned session for the calling guest or member, stores the opening message as sequence 1 and broadcasts a new-chat request to admins.",
    request_body = CreateSessionRequest,
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Session opened", body = CreateSessionResponse),
        (status = 400, description = "Empty or oversized message", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 403, description = "Admins cannot open sessions", body = ErrorResponse),
    )
)]
pub async fn create_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let profile = GuestProfile {
        name: req.name.or(user.display_name),
        email: req.email,
    };
    let (session, message) = state
        .messages
        .start_session(&user.identity, user.role, profile, &req.message)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse { session, message }),
    ))
}

/// `GET /support/sessions/{id}/messages`: Stored messages after a
/// sequence number.
///
/// # Errors
///
/// Returns [`GatewayError`] if the caller is not a participant.
#[utoipa::path(
    get,
    path = "/api/v1/support/sessions/{id}/messages",
    tag = "Support",
    summary = "Session history",
    description = "Returns messages with a sequence number greater than `after_sequence`, oldest first. Only the guest and the claiming admin may read.",
    params(
        ("id" = String, Path, description = "Session UUID"),
        HistoryParams,
    ),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Messages", body = HistoryResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
    )
)]
pub async fn get_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<SessionId>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let messages = state
        .messages
        .history(&user.identity, session_id, params.after_sequence, params.limit)
        .await?;
    Ok(Json(HistoryResponse {
        session_id,
        messages,
    }))
}

/// Support routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/support/sessions", post(create_session))
        .route("/support/sessions/{id}/messages", get(get_messages))
}
