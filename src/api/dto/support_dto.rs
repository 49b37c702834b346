//! Support session DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{ChatSession, Message, SessionId};

/// Request body for `POST /api/v1/support/sessions`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Guest name; falls back to the token's display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
    /// Opening message.
    pub message: String,
}

/// Response body for a newly opened session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateSessionResponse {
    /// The created session.
    pub session: ChatSession,
    /// The opening message (sequence 1).
    pub message: Message,
}

/// Query parameters for the history endpoint.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// Return messages with a larger sequence number. Defaults to 0.
    #[serde(default)]
    pub after_sequence: u64,
    /// Page size (default 50, max 200).
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Response body for the history endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryResponse {
    /// Session the messages belong to.
    #[schema(value_type = String, format = Uuid)]
    pub session_id: SessionId,
    /// Messages in sequence order.
    pub messages: Vec<Message>,
}
