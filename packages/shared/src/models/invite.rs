use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::live_session::{SessionMode, SessionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
    Cancelled,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Declined => "declined",
            InviteStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InviteStatus::Pending)
    }
}

/// The invitee's answer to a pending invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteDecision {
    Accepted,
    Declined,
}

impl InviteDecision {
    pub fn status(&self) -> InviteStatus {
        match self {
            InviteDecision::Accepted => InviteStatus::Accepted,
            InviteDecision::Declined => InviteStatus::Declined,
        }
    }
}

/// A request from one host to another to go live together.
///
/// Rows are never deleted: terminal invites stay behind so retried responses
/// can be answered idempotently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInvite {
    pub id: String,
    pub from_host_id: String,
    pub to_host_id: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub mode: SessionMode,
    pub status: InviteStatus,
    /// Set when the invite asks the invitee to join an already running session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Session created by accepting this invite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl SessionInvite {
    pub fn new(
        from_host_id: &str,
        to_host_id: &str,
        session_type: SessionType,
        mode: SessionMode,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        SessionInvite {
            id: Uuid::new_v4().to_string(),
            from_host_id: from_host_id.to_string(),
            to_host_id: to_host_id.to_string(),
            session_type,
            mode,
            status: InviteStatus::Pending,
            session_id: session_id.map(str::to_string),
            accepted_session_id: None,
            created_at: now,
            responded_at: None,
        }
    }

    /// Session this invite resolved into, if it was accepted.
    pub fn resolved_session_id(&self) -> Option<String> {
        if self.status != InviteStatus::Accepted {
            return None;
        }
        self.accepted_session_id
            .clone()
            .or_else(|| self.session_id.clone())
    }
}

/// Outcome of responding to an invite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteResolution {
    pub invite_id: String,
    pub status: InviteStatus,
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_invite_is_pending() {
        let invite = SessionInvite::new(
            "host-a",
            "host-b",
            SessionType::Battle,
            SessionMode::Speed,
            None,
            Utc::now(),
        );

        assert_eq!(invite.status, InviteStatus::Pending);
        assert!(invite.session_id.is_none());
        assert!(invite.responded_at.is_none());
        assert!(!invite.id.is_empty());
    }

    #[test]
    fn test_invite_ids_are_unique_between_same_pair() {
        let now = Utc::now();
        let first = SessionInvite::new("a", "b", SessionType::Cohost, SessionMode::Speed, None, now);
        let second = SessionInvite::new("a", "b", SessionType::Cohost, SessionMode::Speed, None, now);

        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_resolved_session_id_prefers_created_session() {
        let mut invite = SessionInvite::new(
            "a",
            "b",
            SessionType::Battle,
            SessionMode::Speed,
            None,
            Utc::now(),
        );
        assert_eq!(invite.resolved_session_id(), None);

        invite.status = InviteStatus::Accepted;
        invite.accepted_session_id = Some("created".to_string());
        assert_eq!(invite.resolved_session_id().as_deref(), Some("created"));

        let mut join = SessionInvite::new(
            "a",
            "c",
            SessionType::Cohost,
            SessionMode::Speed,
            Some("existing"),
            Utc::now(),
        );
        join.status = InviteStatus::Accepted;
        assert_eq!(join.resolved_session_id().as_deref(), Some("existing"));

        join.status = InviteStatus::Declined;
        assert_eq!(join.resolved_session_id(), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!InviteStatus::Pending.is_terminal());
        assert!(InviteStatus::Accepted.is_terminal());
        assert!(InviteStatus::Declined.is_terminal());
        assert!(InviteStatus::Cancelled.is_terminal());
        assert_eq!(InviteDecision::Declined.status(), InviteStatus::Declined);
    }
}
