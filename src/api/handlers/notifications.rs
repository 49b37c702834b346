//! Notification handlers: pull reconciliation, producer push, mark-read.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::auth::AuthUser;
use crate::api::dto::{MarkReadResponse, PushNotificationRequest, UnreadCountResponse};
use crate::app_state::AppState;
use crate::domain::{Identity, NotificationEvent, NotificationId, Role};
use crate::error::{ErrorResponse, GatewayError};

/// `GET /notifications/unread-count`: Caller's unread count.
///
/// # Errors
///
/// Returns [`GatewayError`] on authentication or storage failure.
#[utoipa::path(
    get,
    path = "/api/v1/notifications/unread-count",
    tag = "Notifications",
    summary = "Unread count",
    description = "Reads the caller's unread notification count from the store. Clients call this after reconnecting to catch up on pushes they missed.",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Unread count", body = UnreadCountResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
    )
)]
pub async fn unread_count(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, GatewayError> {
    let count = state.notifications.unread_count(&user.identity).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// `POST /notifications`: Push a notification to a user (admins only).
///
/// # Errors
///
/// Returns [`GatewayError`] for non-admin callers, a blank recipient, or
/// storage failure.
#[utoipa::path(
    post,
    path = "/api/v1/notifications",
    tag = "Notifications",
    summary = "Push a notification",
    description = "Stores a notification for `user_id` and delivers it to the user's connected notification clients.",
    request_body = PushNotificationRequest,
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Notification stored", body = NotificationEvent),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    )
)]
pub async fn push_notification(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<PushNotificationRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    if user.role != Role::Admin {
        return Err(GatewayError::Forbidden(
            "only admins can push notifications".to_string(),
        ));
    }
    if req.user_id.trim().is_empty() || req.kind.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(
            "user_id and kind are required".to_string(),
        ));
    }
    let event = state
        .notifications
        .push(&Identity::new(req.user_id), &req.kind, req.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// `POST /notifications/{id}/read`: Mark one of the caller's
/// notifications read. Idempotent.
///
/// # Errors
///
/// Returns [`GatewayError`] on authentication or storage failure.
#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/read",
    tag = "Notifications",
    summary = "Mark read",
    description = "Marks the notification read. Unknown or already-read ids succeed with `changed = false`.",
    params(("id" = String, Path, description = "Notification UUID")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Acknowledged", body = MarkReadResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
    )
)]
pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(event_id): Path<NotificationId>,
) -> Result<impl IntoResponse, GatewayError> {
    let changed = state
        .notifications
        .mark_read(&user.identity, event_id)
        .await?;
    Ok(Json(MarkReadResponse { event_id, changed }))
}

/// Notification routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(push_notification))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/{id}/read", post(mark_read))
}
