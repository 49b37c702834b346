//! OpenAPI document for the REST surface.

use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Generated OpenAPI description, served at `/api-docs/openapi.json`.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "huddle-gateway",
        description = "Real-time support chat and notification gateway"
    ),
    paths(
        crate::api::handlers::system::health_handler,
        crate::api::handlers::support::create_session,
        crate::api::handlers::support::get_messages,
        crate::api::handlers::notifications::unread_count,
        crate::api::handlers::notifications::push_notification,
        crate::api::handlers::notifications::mark_read,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        crate::api::handlers::system::HealthResponse,
        crate::api::dto::CreateSessionRequest,
        crate::api::dto::CreateSessionResponse,
        crate::api::dto::HistoryResponse,
        crate::api::dto::UnreadCountResponse,
        crate::api::dto::PushNotificationRequest,
        crate::api::dto::MarkReadResponse,
        crate::domain::ChatSession,
        crate::domain::GuestProfile,
        crate::domain::SessionStatus,
        crate::domain::Message,
        crate::domain::MessageType,
        crate::domain::NotificationEvent,
    )),
    tags(
        (name = "System", description = "Service health"),
        (name = "Support", description = "Guest support sessions and history"),
        (name = "Notifications", description = "Per-user notifications"),
    ),
    modifiers(&BearerScheme)
)]
pub struct ApiDoc;

struct BearerScheme;

impl Modify for BearerScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        let mut http = Http::new(HttpAuthScheme::Bearer);
        http.bearer_format = Some("JWT".to_string());
        components.add_security_scheme("bearer", SecurityScheme::Http(http));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/support/sessions",
            "/api/v1/support/sessions/{id}/messages",
            "/api/v1/notifications",
            "/api/v1/notifications/unread-count",
            "/api/v1/notifications/{id}/read",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn test_bearer_scheme_registered() {
        let doc = ApiDoc::openapi();
        let has_bearer = doc
            .components
            .as_ref()
            .is_some_and(|c| c.security_schemes.contains_key("bearer"));
        assert!(has_bearer);
    }
}
