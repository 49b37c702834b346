//! Gateway error types with HTTP status and WebSocket close-code mapping.
//!
//! [`AuthError`] is resolved at the handshake boundary, [`RouteError`] is
//! returned to the client that issued a chat command, and [`GatewayError`]
//! is the central error type every service returns. Each variant carries a
//! numeric code, a stable snake_case reason and an HTTP status, so REST
//! responses and WebSocket `error` frames describe failures the same way.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::SessionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2003,
///     "message": "not a member of this session",
///     "details": "not_a_member"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Stable machine-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Handshake failure. Terminal for the connect attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The namespace requires a credential and none was supplied.
    #[error("credential required")]
    NoCredential,

    /// The credential was rejected by the token verifier.
    #[error("credential invalid or expired")]
    InvalidOrExpired,

    /// Too many connect attempts in the current window.
    #[error("too many connection attempts; retry after {retry_after_ms} ms")]
    RateLimited {
        /// Milliseconds until the next attempt may succeed.
        retry_after_ms: u64,
    },
}

impl AuthError {
    /// Stable reason string sent to clients.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::InvalidOrExpired => "invalid_or_expired",
            Self::RateLimited { .. } => "rate_limited",
        }
    }

    /// WebSocket close code sent after a rejected handshake.
    #[must_use]
    pub const fn close_code(&self) -> u16 {
        match self {
            Self::NoCredential => 4401,
            Self::InvalidOrExpired => 4403,
            Self::RateLimited { .. } => 4429,
        }
    }

    /// Retry hint, only present for rate limiting.
    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            Self::NoCredential | Self::InvalidOrExpired => None,
        }
    }
}

/// Rejection of a chat command. Never fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// Sender is not a participant of the session.
    #[error("not a member of this session")]
    NotAMember,

    /// The session no longer accepts messages.
    #[error("session is closed")]
    SessionClosed,

    /// Content failed validation.
    #[error("invalid content: {0}")]
    InvalidContent(String),
}

impl RouteError {
    /// Stable reason string sent to clients.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotAMember => "not_a_member",
            Self::SessionClosed => "session_closed",
            Self::InvalidContent(_) => "invalid_content",
        }
    }
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                     |
/// |-----------|-----------------|---------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request                 |
/// | 2000–2999 | Routing/State   | 403 / 404 / 409                 |
/// | 3000–3999 | Server          | 500 Internal Server Error       |
/// | 4000–4999 | Authentication  | 401 Unauthorized / 429          |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Handshake or bearer authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A chat command was rejected.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Session with the given id does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Caller's role does not allow the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage collaborator failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Route(RouteError::InvalidContent(_)) => 1002,
            Self::SessionNotFound(_) => 2001,
            Self::Route(RouteError::SessionClosed) => 2002,
            Self::Route(RouteError::NotAMember) => 2003,
            Self::Forbidden(_) => 2004,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::Auth(AuthError::NoCredential) => 4001,
            Self::Auth(AuthError::InvalidOrExpired) => 4002,
            Self::Auth(AuthError::RateLimited { .. }) => 4003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Route(RouteError::InvalidContent(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Route(RouteError::NotAMember) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::Route(RouteError::SessionClosed) => StatusCode::CONFLICT,
            Self::Auth(AuthError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable snake_case reason, shared by REST and WebSocket errors.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.reason(),
            Self::Route(e) => e.reason(),
            Self::SessionNotFound(_) => "session_not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidRequest(_) => "invalid_request",
            Self::PersistenceError(_) => "persistence_error",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: Some(self.reason().to_string()),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_reasons_are_distinct() {
        let no_credential = GatewayError::from(AuthError::NoCredential);
        let invalid = GatewayError::from(AuthError::InvalidOrExpired);
        assert_ne!(no_credential.reason(), invalid.reason());
        assert_ne!(no_credential.error_code(), invalid.error_code());
        assert_ne!(
            AuthError::NoCredential.close_code(),
            AuthError::InvalidOrExpired.close_code()
        );
    }

    #[test]
    fn rate_limited_maps_to_429_with_hint() {
        let err = AuthError::RateLimited { retry_after_ms: 1500 };
        assert_eq!(err.retry_after_ms(), Some(1500));
        assert_eq!(
            GatewayError::from(err).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn route_errors_map_to_client_statuses() {
        assert_eq!(
            GatewayError::from(RouteError::NotAMember).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::from(RouteError::SessionClosed).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::from(RouteError::InvalidContent("empty".into())).reason(),
            "invalid_content"
        );
    }

    #[test]
    fn into_response_sets_status() {
        let response = GatewayError::SessionNotFound(SessionId::new()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
