//! Notification DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::NotificationId;

/// Unread notification count.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnreadCountResponse {
    /// Unread notifications of the caller.
    pub count: u64,
}

/// Request body for `POST /api/v1/notifications`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PushNotificationRequest {
    /// Recipient identity.
    pub user_id: String,
    /// Producer-defined kind, e.g. `task_assigned`.
    pub kind: String,
    /// Producer-defined payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Result of a mark-read call.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MarkReadResponse {
    /// Acknowledged notification.
    #[schema(value_type = String, format = Uuid)]
    pub event_id: NotificationId,
    /// `false` when the event was already read or unknown.
    pub changed: bool,
}
