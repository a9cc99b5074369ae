use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::{remaining_seconds, Clock};
use crate::models::invite::{InviteDecision, InviteResolution, InviteStatus, SessionInvite};
use crate::models::live_session::{
    room_name, EndReason, LiveSession, SessionMode, SessionStatus, SessionType, COOLDOWN_SECONDS,
};
use crate::models::participant::{SessionParticipant, MAX_SESSION_SLOTS};
use crate::repositories::errors::invite_repository_errors::InviteRepositoryError;
use crate::repositories::errors::session_repository_errors::SessionRepositoryError;
use crate::repositories::invite_repository::InviteRepository;
use crate::repositories::session_repository::{InviteAcceptance, SessionRepository};
use crate::services::errors::session_coordinator_errors::SessionCoordinatorError;

/// Owns the invite and session state machines.
///
/// Holds no mutable state of its own: every "did this already happen"
/// question is answered by a conditional write in the store, so any number of
/// coordinators may serve the same hosts concurrently.
#[derive(Clone)]
pub struct SessionCoordinator {
    invites: Arc<dyn InviteRepository>,
    sessions: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
}

pub fn parse_session_kind(
    session_type: &str,
    mode: &str,
) -> Result<(SessionType, SessionMode), SessionCoordinatorError> {
    let session_type = SessionType::parse(session_type).ok_or_else(|| {
        SessionCoordinatorError::ValidationError(format!("Unknown session type '{}'", session_type))
    })?;
    let mode = SessionMode::parse(mode).ok_or_else(|| {
        SessionCoordinatorError::ValidationError(format!("Unknown session mode '{}'", mode))
    })?;
    Ok((session_type, mode))
}

pub fn parse_decision(decision: &str) -> Result<InviteDecision, SessionCoordinatorError> {
    match decision {
        "accepted" | "accept" => Ok(InviteDecision::Accepted),
        "declined" | "decline" => Ok(InviteDecision::Declined),
        other => Err(SessionCoordinatorError::ValidationError(format!(
            "Unknown decision '{}'",
            other
        ))),
    }
}

pub fn parse_end_reason(reason: &str) -> Result<EndReason, SessionCoordinatorError> {
    match reason {
        "end" => Ok(EndReason::End),
        "cooldown" => Ok(EndReason::Cooldown),
        other => Err(SessionCoordinatorError::ValidationError(format!(
            "Unknown end reason '{}'",
            other
        ))),
    }
}

impl SessionCoordinator {
    pub fn new(
        invites: Arc<dyn InviteRepository>,
        sessions: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SessionCoordinator {
            invites,
            sessions,
            clock,
        }
    }

    pub async fn issue_invite(
        &self,
        from_host_id: &str,
        to_host_id: &str,
        session_type: SessionType,
        mode: SessionMode,
        existing_session_id: Option<&str>,
    ) -> Result<SessionInvite, SessionCoordinatorError> {
        if from_host_id.trim().is_empty() || to_host_id.trim().is_empty() {
            return Err(SessionCoordinatorError::ValidationError(
                "Host IDs cannot be empty".to_string(),
            ));
        }
        if from_host_id == to_host_id {
            return Err(SessionCoordinatorError::ValidationError(
                "Hosts cannot invite themselves".to_string(),
            ));
        }

        let now = self.clock.now();
        let invite = match existing_session_id {
            None => SessionInvite::new(from_host_id, to_host_id, session_type, mode, None, now),
            Some(session_id) => {
                let session = self.require_joinable(session_id, now).await?;
                let participants = self.sessions.list_participants(session_id).await?;

                if !participants.iter().any(|p| p.profile_id == from_host_id) {
                    return Err(SessionCoordinatorError::Unauthorized(format!(
                        "Host {} is not part of session {}",
                        from_host_id, session_id
                    )));
                }
                if participants.iter().any(|p| p.profile_id == to_host_id) {
                    return Err(SessionCoordinatorError::ValidationError(format!(
                        "Host {} is already part of session {}",
                        to_host_id, session_id
                    )));
                }
                if session.session_type != session_type || session.mode != mode {
                    debug!(
                        "Invite into session {} takes the session's {} {} settings",
                        session_id,
                        session.session_type.as_str(),
                        session.mode.as_str()
                    );
                }

                SessionInvite::new(
                    from_host_id,
                    to_host_id,
                    session.session_type,
                    session.mode,
                    Some(session_id),
                    now,
                )
            }
        };

        self.invites.create_invite(&invite).await?;

        info!(
            "Host {} invited {} ({} {}) with invite {}",
            from_host_id,
            to_host_id,
            invite.session_type.as_str(),
            invite.mode.as_str(),
            invite.id
        );
        Ok(invite)
    }

    pub async fn respond_to_invite(
        &self,
        caller_id: &str,
        invite_id: &str,
        decision: InviteDecision,
    ) -> Result<InviteResolution, SessionCoordinatorError> {
        let invite = self.require_invite(invite_id).await?;

        if invite.to_host_id != caller_id {
            return Err(SessionCoordinatorError::Unauthorized(format!(
                "Host {} is not the invitee of invite {}",
                caller_id, invite_id
            )));
        }
        if invite.status.is_terminal() {
            return Err(Self::already_resolved(&invite, decision.status()));
        }

        match decision {
            InviteDecision::Declined => self.decline(invite).await,
            InviteDecision::Accepted => match invite.session_id.clone() {
                None => self.accept_into_new_session(invite).await,
                Some(session_id) => self.accept_into_existing_session(invite, &session_id).await,
            },
        }
    }

    /// Withdraws a pending invite. Only the inviter may cancel.
    pub async fn cancel_invite(
        &self,
        caller_id: &str,
        invite_id: &str,
    ) -> Result<SessionInvite, SessionCoordinatorError> {
        let invite = self.require_invite(invite_id).await?;

        if invite.from_host_id != caller_id {
            return Err(SessionCoordinatorError::Unauthorized(format!(
                "Host {} did not send invite {}",
                caller_id, invite_id
            )));
        }
        if invite.status.is_terminal() {
            return Err(Self::already_resolved(&invite, InviteStatus::Cancelled));
        }

        let now = self.clock.now();
        match self
            .invites
            .close_invite(invite_id, InviteStatus::Cancelled, now)
            .await
        {
            Ok(()) => {
                info!("Host {} cancelled invite {}", caller_id, invite_id);
                self.require_invite(invite_id).await
            }
            Err(InviteRepositoryError::NotPending) => {
                Err(self.lost_invite_race(invite_id, InviteStatus::Cancelled).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn pending_invites(
        &self,
        host_id: &str,
    ) -> Result<Vec<SessionInvite>, SessionCoordinatorError> {
        Ok(self.invites.list_pending_invites(host_id).await?)
    }

    /// active -> cooldown. Idempotent: a session that already left `active`
    /// is returned as it currently stands.
    pub async fn transition_to_cooldown(
        &self,
        caller_id: &str,
        session_id: &str,
    ) -> Result<LiveSession, SessionCoordinatorError> {
        let session = self.require_session(session_id).await?;
        self.require_participant(caller_id, &session).await?;

        if session.status != SessionStatus::Active {
            debug!(
                "Session {} already {}, cooldown request from {} is a no-op",
                session_id,
                session.status.as_str(),
                caller_id
            );
            return Ok(session);
        }

        let cooldown_ends_at = self.clock.now() + Duration::seconds(COOLDOWN_SECONDS);
        match self
            .sessions
            .enter_cooldown(session_id, cooldown_ends_at)
            .await
        {
            Ok(()) => {
                info!(
                    "Session {} entered cooldown until {} (requested by {})",
                    session_id, cooldown_ends_at, caller_id
                );
            }
            Err(SessionRepositoryError::StatusChanged) => {
                debug!(
                    "Session {} left active before {}'s cooldown request landed",
                    session_id, caller_id
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.require_session(session_id).await
    }

    pub async fn end_session(
        &self,
        caller_id: &str,
        session_id: &str,
        reason: EndReason,
    ) -> Result<LiveSession, SessionCoordinatorError> {
        if reason == EndReason::Cooldown {
            return self.transition_to_cooldown(caller_id, session_id).await;
        }

        let session = self.require_session(session_id).await?;
        let participants = self.require_participant(caller_id, &session).await?;

        if session.status == SessionStatus::Ended {
            debug!("Session {} already ended", session_id);
            return Ok(session);
        }

        // The store only ends the row if no host joined since `session` was
        // read, so `released` covers every claim pointing at it.
        let released: Vec<String> = participants.into_iter().map(|p| p.profile_id).collect();
        match self.sessions.end_session(&session, &released).await {
            Ok(()) => {
                info!("Session {} ended by {}", session_id, caller_id);
                self.require_session(session_id).await
            }
            Err(SessionRepositoryError::StatusChanged) => {
                let current = self.require_session(session_id).await?;
                if current.status == SessionStatus::Ended {
                    debug!("Session {} was ended concurrently", session_id);
                    Ok(current)
                } else {
                    Err(SessionCoordinatorError::Conflict(format!(
                        "Session {} changed while ending",
                        session_id
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ends a session in cooldown and starts a fresh one for the same pair.
    /// Only one rematch can ever spawn from a given session; a caller that
    /// loses the race gets `AlreadyResolved` with the winner's id.
    pub async fn start_rematch(
        &self,
        caller_id: &str,
        session_id: &str,
    ) -> Result<String, SessionCoordinatorError> {
        let source = self.require_session(session_id).await?;

        if !source.is_host(caller_id) {
            return Err(SessionCoordinatorError::Unauthorized(format!(
                "Host {} cannot rematch session {}",
                caller_id, session_id
            )));
        }

        match source.status {
            SessionStatus::Active => {
                return Err(SessionCoordinatorError::InvalidTransition(format!(
                    "Session {} is still active",
                    session_id
                )))
            }
            SessionStatus::Ended => return Err(self.rematch_outcome(session_id).await),
            SessionStatus::Cooldown => {}
        }

        let now = self.clock.now();
        if !source.is_rematchable(now) {
            return Err(SessionCoordinatorError::InvalidTransition(format!(
                "Cooldown of session {} is over",
                session_id
            )));
        }

        let participants = self.sessions.list_participants(session_id).await?;
        let released: Vec<String> = participants
            .into_iter()
            .map(|p| p.profile_id)
            .filter(|profile_id| !source.is_host(profile_id))
            .collect();

        let rematch = source.rematch(now);
        let founders = SessionParticipant::founders(&rematch);

        match self
            .sessions
            .create_rematch(&source, &rematch, &founders, &released)
            .await
        {
            Ok(()) => {
                info!(
                    "Host {} rematched session {} into {}",
                    caller_id, session_id, rematch.session_id
                );
                Ok(rematch.session_id)
            }
            Err(SessionRepositoryError::StatusChanged) => {
                debug!(
                    "Session {} left cooldown before {}'s rematch landed",
                    session_id, caller_id
                );
                Err(self.rematch_outcome(session_id).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_session_room_name(session_id: &str, session_type: SessionType) -> String {
        room_name(session_id, session_type)
    }

    pub async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<LiveSession, SessionCoordinatorError> {
        self.require_session(session_id).await
    }

    /// The one open session `host_id` takes part in, if any.
    pub async fn get_active_session_for_host(
        &self,
        host_id: &str,
    ) -> Result<Option<LiveSession>, SessionCoordinatorError> {
        let mut sessions = self.sessions.find_open_sessions_for_host(host_id).await?;

        if sessions.len() > 1 {
            let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
            error!(
                "Host {} is in {} open sessions at once: {:?}",
                host_id,
                sessions.len(),
                ids
            );
            return Err(SessionCoordinatorError::InconsistentState(format!(
                "Host {} is in {} open sessions",
                host_id,
                sessions.len()
            )));
        }

        Ok(sessions.pop())
    }

    pub async fn get_session_participants(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionParticipant>, SessionCoordinatorError> {
        self.require_session(session_id).await?;
        Ok(self.sessions.list_participants(session_id).await?)
    }

    pub fn get_remaining_seconds(&self, deadline: Option<DateTime<Utc>>) -> u64 {
        remaining_seconds(deadline, self.clock.now())
    }

    async fn decline(
        &self,
        invite: SessionInvite,
    ) -> Result<InviteResolution, SessionCoordinatorError> {
        let now = self.clock.now();
        match self
            .invites
            .close_invite(&invite.id, InviteStatus::Declined, now)
            .await
        {
            Ok(()) => {
                info!("Host {} declined invite {}", invite.to_host_id, invite.id);
                Ok(InviteResolution {
                    invite_id: invite.id,
                    status: InviteStatus::Declined,
                    session_id: None,
                })
            }
            Err(InviteRepositoryError::NotPending) => {
                Err(self.lost_invite_race(&invite.id, InviteStatus::Declined).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn accept_into_new_session(
        &self,
        invite: SessionInvite,
    ) -> Result<InviteResolution, SessionCoordinatorError> {
        let now = self.clock.now();
        let session = LiveSession::start(
            &invite.from_host_id,
            &invite.to_host_id,
            invite.session_type,
            invite.mode,
            Some(&invite.id),
            now,
        );
        let acceptance = InviteAcceptance {
            invite_id: invite.id.clone(),
            responded_at: now,
            accepted_session_id: Some(session.session_id.clone()),
        };
        let founders = SessionParticipant::founders(&session);

        match self
            .sessions
            .create_session_from_invite(&acceptance, &session, &founders)
            .await
        {
            Ok(()) => {
                info!(
                    "Invite {} accepted, session {} started between {} and {} ending at {}",
                    invite.id, session.session_id, session.host_a, session.host_b, session.ends_at
                );
                Ok(InviteResolution {
                    invite_id: invite.id,
                    status: InviteStatus::Accepted,
                    session_id: Some(session.session_id),
                })
            }
            Err(SessionRepositoryError::InviteNotPending) => {
                Err(self.lost_invite_race(&invite.id, InviteStatus::Accepted).await)
            }
            Err(e) => {
                warn!("Accepting invite {} failed: {}", invite.id, e);
                Err(e.into())
            }
        }
    }

    async fn accept_into_existing_session(
        &self,
        invite: SessionInvite,
        session_id: &str,
    ) -> Result<InviteResolution, SessionCoordinatorError> {
        let now = self.clock.now();
        let session = self.require_joinable(session_id, now).await?;

        if session.participant_count >= MAX_SESSION_SLOTS {
            return Err(SessionCoordinatorError::SessionNoLongerJoinable(format!(
                "Session {} is full",
                session_id
            )));
        }

        let participant = SessionParticipant::new(
            session_id,
            &invite.to_host_id,
            session.session_type,
            session.participant_count,
            now,
        );
        let acceptance = InviteAcceptance {
            invite_id: invite.id.clone(),
            responded_at: now,
            accepted_session_id: None,
        };

        match self
            .sessions
            .join_session_from_invite(&acceptance, &session, &participant)
            .await
        {
            Ok(()) => {
                info!(
                    "Invite {} accepted, host {} joined session {} in slot {}",
                    invite.id, invite.to_host_id, session_id, participant.slot_index
                );
                Ok(InviteResolution {
                    invite_id: invite.id,
                    status: InviteStatus::Accepted,
                    session_id: Some(session_id.to_string()),
                })
            }
            Err(SessionRepositoryError::InviteNotPending) => {
                Err(self.lost_invite_race(&invite.id, InviteStatus::Accepted).await)
            }
            Err(SessionRepositoryError::StatusChanged) => {
                let current = self.require_session(session_id).await?;
                if current.is_joinable(self.clock.now()) {
                    Err(SessionCoordinatorError::Conflict(format!(
                        "Session {} changed while joining",
                        session_id
                    )))
                } else {
                    Err(SessionCoordinatorError::SessionNoLongerJoinable(format!(
                        "Session {} is {}",
                        session_id,
                        current.status.as_str()
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Decides what a caller who lost the conditional write on an invite sees.
    async fn lost_invite_race(
        &self,
        invite_id: &str,
        wanted: InviteStatus,
    ) -> SessionCoordinatorError {
        debug!("Lost the race to resolve invite {}", invite_id);
        match self.require_invite(invite_id).await {
            Ok(current) if current.status.is_terminal() => Self::already_resolved(&current, wanted),
            Ok(_) => SessionCoordinatorError::Conflict(format!(
                "Invite {} changed concurrently",
                invite_id
            )),
            Err(e) => e,
        }
    }

    fn already_resolved(invite: &SessionInvite, wanted: InviteStatus) -> SessionCoordinatorError {
        if invite.status == wanted {
            SessionCoordinatorError::AlreadyResolved {
                session_id: invite.resolved_session_id(),
            }
        } else {
            SessionCoordinatorError::InvalidTransition(format!(
                "Invite {} is already {}",
                invite.id,
                invite.status.as_str()
            ))
        }
    }

    async fn rematch_outcome(&self, session_id: &str) -> SessionCoordinatorError {
        match self.sessions.find_rematch_of(session_id).await {
            Ok(Some(next)) => SessionCoordinatorError::AlreadyResolved {
                session_id: Some(next.session_id),
            },
            Ok(None) => match self.require_session(session_id).await {
                Ok(current) if current.status == SessionStatus::Cooldown => {
                    SessionCoordinatorError::Conflict(format!(
                        "Session {} changed during rematch",
                        session_id
                    ))
                }
                Ok(current) => SessionCoordinatorError::InvalidTransition(format!(
                    "Session {} is {} and cannot be rematched",
                    session_id,
                    current.status.as_str()
                )),
                Err(e) => e,
            },
            Err(e) => e.into(),
        }
    }

    async fn require_invite(
        &self,
        invite_id: &str,
    ) -> Result<SessionInvite, SessionCoordinatorError> {
        self.invites
            .get_invite(invite_id)
            .await?
            .ok_or_else(|| SessionCoordinatorError::NotFound(format!("Invite {}", invite_id)))
    }

    async fn require_session(
        &self,
        session_id: &str,
    ) -> Result<LiveSession, SessionCoordinatorError> {
        self.sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionCoordinatorError::NotFound(format!("Session {}", session_id)))
    }

    async fn require_joinable(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LiveSession, SessionCoordinatorError> {
        match self.sessions.get_session(session_id).await? {
            Some(session) if session.is_joinable(now) => Ok(session),
            Some(session) => Err(SessionCoordinatorError::SessionNoLongerJoinable(format!(
                "Session {} is {}",
                session_id,
                session.status.as_str()
            ))),
            None => Err(SessionCoordinatorError::SessionNoLongerJoinable(format!(
                "Session {} does not exist",
                session_id
            ))),
        }
    }

    async fn require_participant(
        &self,
        caller_id: &str,
        session: &LiveSession,
    ) -> Result<Vec<SessionParticipant>, SessionCoordinatorError> {
        let participants = self.sessions.list_participants(&session.session_id).await?;
        if session.is_host(caller_id) || participants.iter().any(|p| p.profile_id == caller_id) {
            Ok(participants)
        } else {
            Err(SessionCoordinatorError::Unauthorized(format!(
                "Host {} is not part of session {}",
                caller_id, session.session_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repositories::invite_repository::MockInviteRepository;
    use crate::repositories::session_repository::MockSessionRepository;
    use chrono::TimeZone;
    use rstest::rstest;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap()
    }

    fn coordinator(
        invites: MockInviteRepository,
        sessions: MockSessionRepository,
    ) -> SessionCoordinator {
        SessionCoordinator::new(
            Arc::new(invites),
            Arc::new(sessions),
            Arc::new(ManualClock::new(fixed_now())),
        )
    }

    fn pending_invite() -> SessionInvite {
        SessionInvite::new(
            "host-a",
            "host-b",
            SessionType::Battle,
            SessionMode::Speed,
            None,
            fixed_now(),
        )
    }

    fn active_session() -> LiveSession {
        LiveSession::start(
            "host-a",
            "host-b",
            SessionType::Battle,
            SessionMode::Speed,
            None,
            fixed_now(),
        )
    }

    #[tokio::test]
    async fn test_self_invite_is_rejected() {
        let service = coordinator(MockInviteRepository::new(), MockSessionRepository::new());

        let result = service
            .issue_invite("host-a", "host-a", SessionType::Battle, SessionMode::Speed, None)
            .await;

        assert!(matches!(result, Err(SessionCoordinatorError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_issue_invite_creates_pending_row() {
        let mut invites = MockInviteRepository::new();
        invites
            .expect_create_invite()
            .withf(|invite| invite.status == InviteStatus::Pending && invite.to_host_id == "host-b")
            .times(1)
            .returning(|_| Ok(()));
        let service = coordinator(invites, MockSessionRepository::new());

        let invite = service
            .issue_invite("host-a", "host-b", SessionType::Cohost, SessionMode::Marathon, None)
            .await
            .unwrap();

        assert_eq!(invite.created_at, fixed_now());
        assert!(invite.session_id.is_none());
    }

    #[tokio::test]
    async fn test_join_invite_requires_inviter_in_session() {
        let session = active_session();
        let session_id = session.session_id.clone();
        let founders = SessionParticipant::founders(&session);

        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        sessions
            .expect_list_participants()
            .returning(move |_| Ok(founders.clone()));
        let service = coordinator(MockInviteRepository::new(), sessions);

        let result = service
            .issue_invite(
                "outsider",
                "host-c",
                SessionType::Battle,
                SessionMode::Speed,
                Some(&session_id),
            )
            .await;

        assert!(matches!(result, Err(SessionCoordinatorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_only_invitee_may_respond() {
        let invite = pending_invite();
        let invite_id = invite.id.clone();
        let mut invites = MockInviteRepository::new();
        invites
            .expect_get_invite()
            .returning(move |_| Ok(Some(invite.clone())));
        let service = coordinator(invites, MockSessionRepository::new());

        let result = service
            .respond_to_invite("host-a", &invite_id, InviteDecision::Accepted)
            .await;

        assert!(matches!(result, Err(SessionCoordinatorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_unknown_invite_is_not_found() {
        let mut invites = MockInviteRepository::new();
        invites.expect_get_invite().returning(|_| Ok(None));
        let service = coordinator(invites, MockSessionRepository::new());

        let result = service
            .respond_to_invite("host-b", "missing", InviteDecision::Declined)
            .await;

        assert!(matches!(result, Err(SessionCoordinatorError::NotFound(_))));
    }

    #[rstest]
    #[case(InviteStatus::Accepted, InviteDecision::Accepted, true)]
    #[case(InviteStatus::Declined, InviteDecision::Declined, true)]
    #[case(InviteStatus::Accepted, InviteDecision::Declined, false)]
    #[case(InviteStatus::Declined, InviteDecision::Accepted, false)]
    #[case(InviteStatus::Cancelled, InviteDecision::Accepted, false)]
    #[tokio::test]
    async fn test_responding_to_resolved_invite(
        #[case] status: InviteStatus,
        #[case] decision: InviteDecision,
        #[case] idempotent: bool,
    ) {
        let mut invite = pending_invite();
        invite.status = status;
        if status == InviteStatus::Accepted {
            invite.accepted_session_id = Some("session-1".to_string());
        }
        let invite_id = invite.id.clone();

        let mut invites = MockInviteRepository::new();
        invites
            .expect_get_invite()
            .returning(move |_| Ok(Some(invite.clone())));
        invites.expect_close_invite().never();
        let mut sessions = MockSessionRepository::new();
        sessions.expect_create_session_from_invite().never();
        let service = coordinator(invites, sessions);

        let err = service
            .respond_to_invite("host-b", &invite_id, decision)
            .await
            .unwrap_err();

        if idempotent {
            assert!(err.is_already_resolved());
        } else {
            assert!(matches!(err, SessionCoordinatorError::InvalidTransition(_)));
        }
    }

    #[tokio::test]
    async fn test_accept_creates_session_with_mode_deadline() {
        let invite = pending_invite();
        let invite_id = invite.id.clone();

        let mut invites = MockInviteRepository::new();
        invites
            .expect_get_invite()
            .returning(move |_| Ok(Some(invite.clone())));
        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_create_session_from_invite()
            .withf(|acceptance, session, participants| {
                acceptance.accepted_session_id.as_deref() == Some(session.session_id.as_str())
                    && session.ends_at == fixed_now() + Duration::seconds(60)
                    && session.host_a == "host-a"
                    && session.host_b == "host-b"
                    && participants.len() == 2
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let service = coordinator(invites, sessions);

        let resolution = service
            .respond_to_invite("host-b", &invite_id, InviteDecision::Accepted)
            .await
            .unwrap();

        assert_eq!(resolution.status, InviteStatus::Accepted);
        assert!(resolution.session_id.is_some());
    }

    #[tokio::test]
    async fn test_lost_accept_race_reports_winning_session() {
        let invite = pending_invite();
        let invite_id = invite.id.clone();
        let mut resolved = invite.clone();
        resolved.status = InviteStatus::Accepted;
        resolved.accepted_session_id = Some("winner".to_string());

        let mut invites = MockInviteRepository::new();
        let mut reads = 0;
        invites.expect_get_invite().returning(move |_| {
            reads += 1;
            if reads == 1 {
                Ok(Some(invite.clone()))
            } else {
                Ok(Some(resolved.clone()))
            }
        });
        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_create_session_from_invite()
            .returning(|_, _, _| Err(SessionRepositoryError::InviteNotPending));
        let service = coordinator(invites, sessions);

        let err = service
            .respond_to_invite("host-b", &invite_id, InviteDecision::Accepted)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionCoordinatorError::AlreadyResolved { session_id: Some(ref id) } if id == "winner"
        ));
    }

    #[tokio::test]
    async fn test_accept_fails_when_host_busy() {
        let invite = pending_invite();
        let invite_id = invite.id.clone();

        let mut invites = MockInviteRepository::new();
        invites
            .expect_get_invite()
            .returning(move |_| Ok(Some(invite.clone())));
        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_create_session_from_invite()
            .returning(|_, _, _| Err(SessionRepositoryError::HostBusy("host-a".to_string())));
        let service = coordinator(invites, sessions);

        let err = service
            .respond_to_invite("host-b", &invite_id, InviteDecision::Accepted)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionCoordinatorError::HostBusy(ref host) if host == "host-a"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_join_after_cooldown_expired_is_not_joinable() {
        let mut session = active_session();
        session.status = SessionStatus::Cooldown;
        session.cooldown_ends_at = Some(fixed_now() - Duration::seconds(1));
        let invite = SessionInvite::new(
            "host-a",
            "host-c",
            SessionType::Battle,
            SessionMode::Speed,
            Some(&session.session_id),
            fixed_now(),
        );
        let invite_id = invite.id.clone();

        let mut invites = MockInviteRepository::new();
        invites
            .expect_get_invite()
            .returning(move |_| Ok(Some(invite.clone())));
        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        sessions.expect_join_session_from_invite().never();
        let service = coordinator(invites, sessions);

        let err = service
            .respond_to_invite("host-c", &invite_id, InviteDecision::Accepted)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionCoordinatorError::SessionNoLongerJoinable(_)));
    }

    #[tokio::test]
    async fn test_join_full_session_is_not_joinable() {
        let mut session = LiveSession::start(
            "host-a",
            "host-b",
            SessionType::Cohost,
            SessionMode::Marathon,
            None,
            fixed_now(),
        );
        session.participant_count = MAX_SESSION_SLOTS;
        let invite = SessionInvite::new(
            "host-a",
            "host-z",
            SessionType::Cohost,
            SessionMode::Marathon,
            Some(&session.session_id),
            fixed_now(),
        );
        let invite_id = invite.id.clone();

        let mut invites = MockInviteRepository::new();
        invites
            .expect_get_invite()
            .returning(move |_| Ok(Some(invite.clone())));
        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        let service = coordinator(invites, sessions);

        let err = service
            .respond_to_invite("host-z", &invite_id, InviteDecision::Accepted)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionCoordinatorError::SessionNoLongerJoinable(_)));
    }

    #[tokio::test]
    async fn test_cooldown_race_loser_gets_current_row() {
        let session = active_session();
        let session_id = session.session_id.clone();
        let mut cooled = session.clone();
        cooled.status = SessionStatus::Cooldown;
        cooled.cooldown_ends_at = Some(fixed_now() + Duration::seconds(25));
        let founders = SessionParticipant::founders(&session);

        let mut sessions = MockSessionRepository::new();
        let mut reads = 0;
        sessions.expect_get_session().returning(move |_| {
            reads += 1;
            if reads == 1 {
                Ok(Some(session.clone()))
            } else {
                Ok(Some(cooled.clone()))
            }
        });
        sessions
            .expect_list_participants()
            .returning(move |_| Ok(founders.clone()));
        sessions
            .expect_enter_cooldown()
            .returning(|_, _| Err(SessionRepositoryError::StatusChanged));
        let service = coordinator(MockInviteRepository::new(), sessions);

        let result = service
            .transition_to_cooldown("host-b", &session_id)
            .await
            .unwrap();

        assert_eq!(result.status, SessionStatus::Cooldown);
        assert_eq!(
            result.cooldown_ends_at,
            Some(fixed_now() + Duration::seconds(25))
        );
    }

    #[tokio::test]
    async fn test_cooldown_requires_participant() {
        let session = active_session();
        let session_id = session.session_id.clone();
        let founders = SessionParticipant::founders(&session);

        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        sessions
            .expect_list_participants()
            .returning(move |_| Ok(founders.clone()));
        sessions.expect_enter_cooldown().never();
        let service = coordinator(MockInviteRepository::new(), sessions);

        let result = service.transition_to_cooldown("viewer", &session_id).await;

        assert!(matches!(result, Err(SessionCoordinatorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_rematch_from_active_is_invalid() {
        let session = active_session();
        let session_id = session.session_id.clone();

        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        sessions.expect_create_rematch().never();
        let service = coordinator(MockInviteRepository::new(), sessions);

        let result = service.start_rematch("host-a", &session_id).await;

        assert!(matches!(result, Err(SessionCoordinatorError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_rematch_after_cooldown_deadline_is_invalid() {
        let mut session = active_session();
        session.status = SessionStatus::Cooldown;
        session.cooldown_ends_at = Some(fixed_now() - Duration::seconds(1));
        let session_id = session.session_id.clone();

        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        sessions.expect_list_participants().never();
        sessions.expect_create_rematch().never();
        let service = coordinator(MockInviteRepository::new(), sessions);

        let result = service.start_rematch("host-a", &session_id).await;

        assert!(matches!(result, Err(SessionCoordinatorError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_end_racing_a_join_is_a_conflict() {
        let session = active_session();
        let session_id = session.session_id.clone();
        let participants = SessionParticipant::founders(&session);

        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        sessions
            .expect_list_participants()
            .returning(move |_| Ok(participants.clone()));
        sessions
            .expect_end_session()
            .times(1)
            .returning(|_, _| Err(SessionRepositoryError::StatusChanged));
        let service = coordinator(MockInviteRepository::new(), sessions);

        let err = service
            .end_session("host-a", &session_id, EndReason::End)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionCoordinatorError::Conflict(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rematch_of_superseded_session_returns_successor() {
        let mut source = active_session();
        source.status = SessionStatus::Ended;
        let source_id = source.session_id.clone();
        let successor = source.rematch(fixed_now());
        let successor_id = successor.session_id.clone();

        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(source.clone())));
        sessions
            .expect_find_rematch_of()
            .returning(move |_| Ok(Some(successor.clone())));
        let service = coordinator(MockInviteRepository::new(), sessions);

        let err = service.start_rematch("host-b", &source_id).await.unwrap_err();

        assert!(matches!(
            err,
            SessionCoordinatorError::AlreadyResolved { session_id: Some(ref id) } if *id == successor_id
        ));
    }

    #[tokio::test]
    async fn test_rematch_releases_extra_cohosts() {
        let mut source = LiveSession::start(
            "host-a",
            "host-b",
            SessionType::Cohost,
            SessionMode::Speed,
            None,
            fixed_now(),
        );
        source.status = SessionStatus::Cooldown;
        source.cooldown_ends_at = Some(fixed_now() + Duration::seconds(30));
        source.participant_count = 3;
        let source_id = source.session_id.clone();
        let mut participants = SessionParticipant::founders(&source);
        participants.push(SessionParticipant::new(
            &source.session_id,
            "host-c",
            SessionType::Cohost,
            2,
            fixed_now(),
        ));

        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(source.clone())));
        sessions
            .expect_list_participants()
            .returning(move |_| Ok(participants.clone()));
        sessions
            .expect_create_rematch()
            .withf(|source, rematch, founders, released| {
                rematch.previous_session_id.as_deref() == Some(source.session_id.as_str())
                    && founders.len() == 2
                    && released == ["host-c".to_string()]
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let service = coordinator(MockInviteRepository::new(), sessions);

        let new_id = service.start_rematch("host-a", &source_id).await.unwrap();

        assert_ne!(new_id, source_id);
    }

    #[tokio::test]
    async fn test_multiple_open_sessions_fail_loudly() {
        let first = active_session();
        let second = active_session();

        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_find_open_sessions_for_host()
            .returning(move |_| Ok(vec![first.clone(), second.clone()]));
        let service = coordinator(MockInviteRepository::new(), sessions);

        let result = service.get_active_session_for_host("host-a").await;

        assert!(matches!(result, Err(SessionCoordinatorError::InconsistentState(_))));
    }

    #[tokio::test]
    async fn test_manual_end_on_ended_session_is_idempotent() {
        let mut session = active_session();
        session.status = SessionStatus::Ended;
        let session_id = session.session_id.clone();
        let founders = SessionParticipant::founders(&session);

        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        sessions
            .expect_list_participants()
            .returning(move |_| Ok(founders.clone()));
        sessions.expect_end_session().never();
        let service = coordinator(MockInviteRepository::new(), sessions);

        let result = service
            .end_session("host-a", &session_id, EndReason::End)
            .await
            .unwrap();

        assert_eq!(result.status, SessionStatus::Ended);
    }

    #[test]
    fn test_remaining_seconds_uses_clock() {
        let service = coordinator(MockInviteRepository::new(), MockSessionRepository::new());

        assert_eq!(
            service.get_remaining_seconds(Some(fixed_now() + Duration::seconds(42))),
            42
        );
        assert_eq!(
            service.get_remaining_seconds(Some(fixed_now() - Duration::seconds(5))),
            0
        );
    }

    #[rstest]
    #[case("battle", "speed", true)]
    #[case("cohost", "marathon", true)]
    #[case("duel", "speed", false)]
    #[case("battle", "blitz", false)]
    fn test_parse_session_kind(#[case] session_type: &str, #[case] mode: &str, #[case] ok: bool) {
        assert_eq!(parse_session_kind(session_type, mode).is_ok(), ok);
    }
}
