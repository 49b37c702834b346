//! Support chat sessions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Identity, SessionId};

/// Lifecycle state of a chat session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for an admin to claim it.
    Unassigned,
    /// Claimed by exactly one admin.
    Assigned,
    /// Finished. Terminal.
    Closed,
}

impl SessionStatus {
    /// Returns `true` if `self -> next` is a permitted transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unassigned, Self::Assigned)
                | (Self::Unassigned, Self::Closed)
                | (Self::Assigned, Self::Closed)
        )
    }

    /// Returns the storage name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unassigned => "unassigned",
            Self::Assigned => "assigned",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(Self::Unassigned),
            "assigned" => Ok(Self::Assigned),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Contact details a guest supplies when opening a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GuestProfile {
    /// Name shown to admins.
    #[serde(default)]
    pub name: Option<String>,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
}

/// What admins see in an `admin:new-chat-request` event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GuestSummary {
    /// Guest identity.
    #[schema(value_type = String)]
    pub identity: Identity,
    /// Guest name, if given.
    pub name: Option<String>,
    /// Guest email, if given.
    pub email: Option<String>,
    /// First characters of the opening message.
    pub preview: String,
}

/// Longest opening-message preview shown to admins, in characters.
const PREVIEW_CHARS: usize = 120;

impl GuestSummary {
    /// Builds the summary for a freshly created session.
    #[must_use]
    pub fn new(identity: Identity, profile: &GuestProfile, first_message: &str) -> Self {
        Self {
            identity,
            name: profile.name.clone(),
            email: profile.email.clone(),
            preview: first_message.chars().take(PREVIEW_CHARS).collect(),
        }
    }
}

/// Durable chat session record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatSession {
    /// Session id.
    #[schema(value_type = String, format = Uuid)]
    pub id: SessionId,
    /// Current status.
    pub status: SessionStatus,
    /// Guest who opened the session.
    #[schema(value_type = String)]
    pub guest: Identity,
    /// Guest contact details.
    pub guest_profile: GuestProfile,
    /// Admin holding the claim, if any.
    #[schema(value_type = Option<String>)]
    pub claimed_by: Option<Identity>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last message or status change.
    pub last_activity_at: DateTime<Utc>,
}

impl ChatSession {
    /// Creates a new unassigned session.
    #[must_use]
    pub fn new(guest: Identity, guest_profile: GuestProfile) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            status: SessionStatus::Unassigned,
            guest,
            guest_profile,
            claimed_by: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Returns `true` if `identity` is the guest or the claiming admin.
    #[must_use]
    pub fn is_participant(&self, identity: &Identity) -> bool {
        self.guest == *identity || self.claimed_by.as_ref() == Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic() {
        use SessionStatus::*;
        assert!(Unassigned.can_transition_to(Assigned));
        assert!(Unassigned.can_transition_to(Closed));
        assert!(Assigned.can_transition_to(Closed));
        assert!(!Assigned.can_transition_to(Unassigned));
        assert!(!Closed.can_transition_to(Unassigned));
        assert!(!Closed.can_transition_to(Assigned));
        assert!(!Assigned.can_transition_to(Assigned));
    }

    #[test]
    fn status_round_trips_through_storage_name() {
        for status in [
            SessionStatus::Unassigned,
            SessionStatus::Assigned,
            SessionStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().ok(), Some(status));
        }
    }

    #[test]
    fn participants_are_guest_and_claimer() {
        let mut session = ChatSession::new(Identity::new("guest"), GuestProfile::default());
        assert!(session.is_participant(&Identity::new("guest")));
        assert!(!session.is_participant(&Identity::new("admin")));
        session.claimed_by = Some(Identity::new("admin"));
        assert!(session.is_participant(&Identity::new("admin")));
    }

    #[test]
    fn preview_is_truncated_by_chars() {
        let long = "é".repeat(500);
        let summary = GuestSummary::new(Identity::new("g"), &GuestProfile::default(), &long);
        assert_eq!(summary.preview.chars().count(), PREVIEW_CHARS);
    }
}
