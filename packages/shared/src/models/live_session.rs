use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the post-session window during which a rematch may be started.
pub const COOLDOWN_SECONDS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Battle,
    Cohost,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Battle => "battle",
            SessionType::Cohost => "cohost",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "battle" => Some(SessionType::Battle),
            "cohost" => Some(SessionType::Cohost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Speed,
    Marathon,
}

impl SessionMode {
    /// Fixed length of the active phase for this mode.
    pub fn duration(&self) -> Duration {
        match self {
            SessionMode::Speed => Duration::seconds(60),
            SessionMode::Marathon => Duration::seconds(180),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Speed => "speed",
            SessionMode::Marathon => "marathon",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "speed" => Some(SessionMode::Speed),
            "marathon" => Some(SessionMode::Marathon),
            _ => None,
        }
    }
}

/// Session phase. Only ever moves forward: active -> cooldown -> ended, or active -> ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Cooldown,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Cooldown => "cooldown",
            SessionStatus::Ended => "ended",
        }
    }

    /// Active and cooldown sessions hold their hosts; ended ones release them.
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Cooldown)
    }
}

/// How a participant asks a session to wind down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    End,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSession {
    pub session_id: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub mode: SessionMode,
    pub host_a: String,
    pub host_b: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<String>,
    /// Invite whose acceptance created this session; `None` for rematches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_invite_id: Option<String>,
    /// Number of participant rows; bumped under a condition when a co-host joins.
    pub participant_count: u32,
}

impl LiveSession {
    /// A freshly accepted session between the inviter (`host_a`) and the invitee (`host_b`).
    pub fn start(
        host_a: &str,
        host_b: &str,
        session_type: SessionType,
        mode: SessionMode,
        origin_invite_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        LiveSession {
            session_id: Uuid::new_v4().to_string(),
            session_type,
            mode,
            host_a: host_a.to_string(),
            host_b: host_b.to_string(),
            status: SessionStatus::Active,
            started_at: now,
            ends_at: now + mode.duration(),
            cooldown_ends_at: None,
            previous_session_id: None,
            origin_invite_id: origin_invite_id.map(str::to_string),
            participant_count: 2,
        }
    }

    /// A follow-up session for the same host pair, linked back to `self`.
    pub fn rematch(&self, now: DateTime<Utc>) -> Self {
        let mut next = LiveSession::start(
            &self.host_a,
            &self.host_b,
            self.session_type,
            self.mode,
            None,
            now,
        );
        next.previous_session_id = Some(self.session_id.clone());
        next
    }

    pub fn is_host(&self, profile_id: &str) -> bool {
        self.host_a == profile_id || self.host_b == profile_id
    }

    /// Deadline of the current phase: `cooldown_ends_at` in cooldown, `ends_at` otherwise.
    pub fn current_deadline(&self) -> Option<DateTime<Utc>> {
        match self.status {
            SessionStatus::Active => Some(self.ends_at),
            SessionStatus::Cooldown => self.cooldown_ends_at,
            SessionStatus::Ended => None,
        }
    }

    /// Whether a new participant may still be admitted at `now`.
    pub fn is_joinable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SessionStatus::Active => true,
            SessionStatus::Cooldown => self
                .cooldown_ends_at
                .map(|deadline| deadline > now)
                .unwrap_or(false),
            SessionStatus::Ended => false,
        }
    }

    /// Whether a rematch may still start at `now`. The deadline itself counts.
    pub fn is_rematchable(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Cooldown
            && self
                .cooldown_ends_at
                .map(|deadline| now <= deadline)
                .unwrap_or(false)
    }

    pub fn room_name(&self) -> String {
        room_name(&self.session_id, self.session_type)
    }
}

/// Name of the external media room backing a session.
pub fn room_name(session_id: &str, session_type: SessionType) -> String {
    format!("{}_{}", session_type.as_str(), session_id)
}
