use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::live_session::{LiveSession, SessionType};

/// Most hosts a single session can admit.
pub const MAX_SESSION_SLOTS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

/// A host merged into a session. Rows are keyed by (session_id, profile_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParticipant {
    pub session_id: String,
    pub profile_id: String,
    pub team: Team,
    pub slot_index: u32,
    pub joined_at: DateTime<Utc>,
}

impl SessionParticipant {
    pub fn new(
        session_id: &str,
        profile_id: &str,
        session_type: SessionType,
        slot_index: u32,
        joined_at: DateTime<Utc>,
    ) -> Self {
        SessionParticipant {
            session_id: session_id.to_string(),
            profile_id: profile_id.to_string(),
            team: team_for_slot(session_type, slot_index),
            slot_index,
            joined_at,
        }
    }

    /// The two founding rows of a session: host_a in slot 0, host_b in slot 1.
    pub fn founders(session: &LiveSession) -> Vec<SessionParticipant> {
        vec![
            SessionParticipant::new(
                &session.session_id,
                &session.host_a,
                session.session_type,
                0,
                session.started_at,
            ),
            SessionParticipant::new(
                &session.session_id,
                &session.host_b,
                session.session_type,
                1,
                session.started_at,
            ),
        ]
    }
}

/// Battles alternate sides by slot; co-hosts all share one side.
pub fn team_for_slot(session_type: SessionType, slot_index: u32) -> Team {
    match session_type {
        SessionType::Battle if slot_index % 2 == 1 => Team::B,
        _ => Team::A,
    }
}
