use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::fanout::{ChangeFeed, ChangeKind, ChangedRow, RowChange};
use crate::models::invite::{InviteStatus, SessionInvite};
use crate::models::live_session::{LiveSession, SessionStatus};
use crate::models::participant::SessionParticipant;
use crate::repositories::errors::invite_repository_errors::InviteRepositoryError;
use crate::repositories::errors::session_repository_errors::SessionRepositoryError;
use crate::repositories::invite_repository::InviteRepository;
use crate::repositories::session_repository::{InviteAcceptance, SessionRepository};

#[derive(Default)]
struct StoreState {
    invites: HashMap<String, SessionInvite>,
    sessions: HashMap<String, LiveSession>,
    participants: HashMap<String, Vec<SessionParticipant>>,
    /// host_id -> session_id
    claims: HashMap<String, String>,
}

impl StoreState {
    fn claim_free(&self, host_id: &str, takeover_from: Option<&str>) -> bool {
        match self.claims.get(host_id) {
            None => true,
            Some(session_id) => Some(session_id.as_str()) == takeover_from,
        }
    }

    fn check_pending(&self, invite_id: &str) -> Result<(), SessionRepositoryError> {
        match self.invites.get(invite_id) {
            Some(invite) if invite.status == InviteStatus::Pending => Ok(()),
            _ => Err(SessionRepositoryError::InviteNotPending),
        }
    }

    fn check_new_participant(
        &self,
        participant: &SessionParticipant,
    ) -> Result<(), SessionRepositoryError> {
        let exists = self
            .participants
            .get(&participant.session_id)
            .map(|rows| rows.iter().any(|row| row.profile_id == participant.profile_id))
            .unwrap_or(false);
        if exists {
            return Err(SessionRepositoryError::DynamoDb(format!(
                "Participant {} already in session {}",
                participant.profile_id, participant.session_id
            )));
        }
        Ok(())
    }

    fn check_release(&self, host_id: &str, session_id: &str) -> Result<(), SessionRepositoryError> {
        if self.claim_free(host_id, Some(session_id)) {
            Ok(())
        } else {
            Err(SessionRepositoryError::DynamoDb(format!(
                "Host {} is claimed by another session",
                host_id
            )))
        }
    }

    fn accept(&mut self, acceptance: &InviteAcceptance) -> Option<RowChange> {
        let invite = self.invites.get_mut(&acceptance.invite_id)?;
        invite.status = InviteStatus::Accepted;
        invite.responded_at = Some(acceptance.responded_at);
        if acceptance.accepted_session_id.is_some() {
            invite.accepted_session_id = acceptance.accepted_session_id.clone();
        }
        Some(RowChange::new(
            ChangeKind::Modify,
            ChangedRow::Invite(invite.clone()),
        ))
    }

    fn add_participant(&mut self, participant: &SessionParticipant) -> RowChange {
        self.claims
            .insert(participant.profile_id.clone(), participant.session_id.clone());
        self.participants
            .entry(participant.session_id.clone())
            .or_default()
            .push(participant.clone());
        RowChange::new(
            ChangeKind::Insert,
            ChangedRow::Participant(participant.clone()),
        )
    }

    fn set_status(&mut self, session_id: &str, status: SessionStatus) -> Option<RowChange> {
        let session = self.sessions.get_mut(session_id)?;
        session.status = status;
        Some(RowChange::new(
            ChangeKind::Modify,
            ChangedRow::Session(session.clone()),
        ))
    }
}

/// Process-local store implementing both repositories with the same
/// conditional semantics as the DynamoDB tables, guarded by a single lock.
///
/// Committed changes are published to the attached [`ChangeFeed`] after the
/// lock is released, the way a table stream would deliver them.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    feed: Option<Arc<dyn ChangeFeed>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            feed: Some(feed),
        }
    }

    /// Writes a session and its participant rows without checking any
    /// condition or claim. Intended for staging fixtures, including broken ones.
    pub async fn seed_session(&self, session: LiveSession, participants: Vec<SessionParticipant>) {
        let mut state = self.state.lock().await;
        for participant in &participants {
            if session.status.is_open() {
                state
                    .claims
                    .insert(participant.profile_id.clone(), session.session_id.clone());
            }
        }
        state
            .participants
            .insert(session.session_id.clone(), participants);
        state.sessions.insert(session.session_id.clone(), session);
    }

    /// Session a host is currently claimed by, if any.
    pub async fn claim_of(&self, host_id: &str) -> Option<String> {
        self.state.lock().await.claims.get(host_id).cloned()
    }

    fn publish(&self, changes: Vec<RowChange>) {
        if let Some(feed) = &self.feed {
            for change in changes {
                feed.publish(change);
            }
        }
    }
}

#[async_trait]
impl InviteRepository for InMemoryStore {
    async fn create_invite(&self, invite: &SessionInvite) -> Result<(), InviteRepositoryError> {
        {
            let mut state = self.state.lock().await;
            if state.invites.contains_key(&invite.id) {
                return Err(InviteRepositoryError::DynamoDb(format!(
                    "Invite {} already exists",
                    invite.id
                )));
            }
            state.invites.insert(invite.id.clone(), invite.clone());
        }

        self.publish(vec![RowChange::new(
            ChangeKind::Insert,
            ChangedRow::Invite(invite.clone()),
        )]);
        Ok(())
    }

    async fn get_invite(
        &self,
        invite_id: &str,
    ) -> Result<Option<SessionInvite>, InviteRepositoryError> {
        Ok(self.state.lock().await.invites.get(invite_id).cloned())
    }

    async fn list_pending_invites(
        &self,
        to_host_id: &str,
    ) -> Result<Vec<SessionInvite>, InviteRepositoryError> {
        let state = self.state.lock().await;
        let mut invites: Vec<SessionInvite> = state
            .invites
            .values()
            .filter(|invite| invite.to_host_id == to_host_id)
            .filter(|invite| invite.status == InviteStatus::Pending)
            .cloned()
            .collect();
        invites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invites)
    }

    async fn close_invite(
        &self,
        invite_id: &str,
        status: InviteStatus,
        responded_at: DateTime<Utc>,
    ) -> Result<(), InviteRepositoryError> {
        let change = {
            let mut state = self.state.lock().await;
            match state.invites.get_mut(invite_id) {
                Some(invite) if invite.status == InviteStatus::Pending => {
                    invite.status = status;
                    invite.responded_at = Some(responded_at);
                    RowChange::new(ChangeKind::Modify, ChangedRow::Invite(invite.clone()))
                }
                _ => return Err(InviteRepositoryError::NotPending),
            }
        };

        self.publish(vec![change]);
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<LiveSession>, SessionRepositoryError> {
        Ok(self.state.lock().await.sessions.get(session_id).cloned())
    }

    async fn list_participants(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionParticipant>, SessionRepositoryError> {
        let state = self.state.lock().await;
        let mut participants = state
            .participants
            .get(session_id)
            .cloned()
            .unwrap_or_default();
        participants.sort_by_key(|participant| participant.slot_index);
        Ok(participants)
    }

    async fn find_open_sessions_for_host(
        &self,
        host_id: &str,
    ) -> Result<Vec<LiveSession>, SessionRepositoryError> {
        let state = self.state.lock().await;
        let mut sessions: Vec<LiveSession> = state
            .sessions
            .values()
            .filter(|session| session.status.is_open())
            .filter(|session| {
                state
                    .participants
                    .get(&session.session_id)
                    .map(|rows| rows.iter().any(|row| row.profile_id == host_id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(sessions)
    }

    async fn find_rematch_of(
        &self,
        session_id: &str,
    ) -> Result<Option<LiveSession>, SessionRepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|session| session.previous_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn create_session_from_invite(
        &self,
        acceptance: &InviteAcceptance,
        session: &LiveSession,
        participants: &[SessionParticipant],
    ) -> Result<(), SessionRepositoryError> {
        let changes = {
            let mut state = self.state.lock().await;

            state.check_pending(&acceptance.invite_id)?;
            if state.sessions.contains_key(&session.session_id) {
                return Err(SessionRepositoryError::DynamoDb(format!(
                    "Session {} already exists",
                    session.session_id
                )));
            }
            for participant in participants {
                state.check_new_participant(participant)?;
                if !state.claim_free(&participant.profile_id, None) {
                    return Err(SessionRepositoryError::HostBusy(
                        participant.profile_id.clone(),
                    ));
                }
            }

            let mut changes = Vec::new();
            changes.extend(state.accept(acceptance));
            state
                .sessions
                .insert(session.session_id.clone(), session.clone());
            changes.push(RowChange::new(
                ChangeKind::Insert,
                ChangedRow::Session(session.clone()),
            ));
            for participant in participants {
                changes.push(state.add_participant(participant));
            }
            changes
        };

        self.publish(changes);
        Ok(())
    }

    async fn join_session_from_invite(
        &self,
        acceptance: &InviteAcceptance,
        session: &LiveSession,
        participant: &SessionParticipant,
    ) -> Result<(), SessionRepositoryError> {
        let changes = {
            let mut state = self.state.lock().await;

            state.check_pending(&acceptance.invite_id)?;
            match state.sessions.get(&session.session_id) {
                Some(current)
                    if current.status.is_open()
                        && current.participant_count == session.participant_count => {}
                _ => return Err(SessionRepositoryError::StatusChanged),
            }
            state.check_new_participant(participant)?;
            if !state.claim_free(&participant.profile_id, None) {
                return Err(SessionRepositoryError::HostBusy(
                    participant.profile_id.clone(),
                ));
            }

            let mut changes = Vec::new();
            changes.extend(state.accept(acceptance));
            if let Some(current) = state.sessions.get_mut(&session.session_id) {
                current.participant_count += 1;
                changes.push(RowChange::new(
                    ChangeKind::Modify,
                    ChangedRow::Session(current.clone()),
                ));
            }
            changes.push(state.add_participant(participant));
            changes
        };

        self.publish(changes);
        Ok(())
    }

    async fn enter_cooldown(
        &self,
        session_id: &str,
        cooldown_ends_at: DateTime<Utc>,
    ) -> Result<(), SessionRepositoryError> {
        let change = {
            let mut state = self.state.lock().await;
            match state.sessions.get_mut(session_id) {
                Some(session)
                    if session.status == SessionStatus::Active
                        && session.cooldown_ends_at.is_none() =>
                {
                    session.status = SessionStatus::Cooldown;
                    session.cooldown_ends_at = Some(cooldown_ends_at);
                    RowChange::new(ChangeKind::Modify, ChangedRow::Session(session.clone()))
                }
                _ => return Err(SessionRepositoryError::StatusChanged),
            }
        };

        self.publish(vec![change]);
        Ok(())
    }

    async fn end_session(
        &self,
        session: &LiveSession,
        released_hosts: &[String],
    ) -> Result<(), SessionRepositoryError> {
        let session_id = session.session_id.as_str();
        let changes = {
            let mut state = self.state.lock().await;

            match state.sessions.get(session_id) {
                Some(current)
                    if current.status.is_open()
                        && current.participant_count == session.participant_count => {}
                _ => return Err(SessionRepositoryError::StatusChanged),
            }
            for host_id in released_hosts {
                state.check_release(host_id, session_id)?;
            }

            let changes: Vec<RowChange> = state
                .set_status(session_id, SessionStatus::Ended)
                .into_iter()
                .collect();
            for host_id in released_hosts {
                state.claims.remove(host_id);
            }
            changes
        };

        self.publish(changes);
        Ok(())
    }

    async fn create_rematch(
        &self,
        source: &LiveSession,
        rematch: &LiveSession,
        participants: &[SessionParticipant],
        released_hosts: &[String],
    ) -> Result<(), SessionRepositoryError> {
        let changes = {
            let mut state = self.state.lock().await;

            match state.sessions.get(&source.session_id) {
                Some(current)
                    if current.status == SessionStatus::Cooldown
                        && current.participant_count == source.participant_count => {}
                _ => return Err(SessionRepositoryError::StatusChanged),
            }
            if state.sessions.contains_key(&rematch.session_id) {
                return Err(SessionRepositoryError::DynamoDb(format!(
                    "Session {} already exists",
                    rematch.session_id
                )));
            }
            for participant in participants {
                state.check_new_participant(participant)?;
                if !state.claim_free(&participant.profile_id, Some(&source.session_id)) {
                    return Err(SessionRepositoryError::HostBusy(
                        participant.profile_id.clone(),
                    ));
                }
            }
            for host_id in released_hosts {
                state.check_release(host_id, &source.session_id)?;
            }

            let mut changes: Vec<RowChange> = state
                .set_status(&source.session_id, SessionStatus::Ended)
                .into_iter()
                .collect();
            state
                .sessions
                .insert(rematch.session_id.clone(), rematch.clone());
            changes.push(RowChange::new(
                ChangeKind::Insert,
                ChangedRow::Session(rematch.clone()),
            ));
            for participant in participants {
                changes.push(state.add_participant(participant));
            }
            for host_id in released_hosts {
                state.claims.remove(host_id);
            }
            changes
        };

        self.publish(changes);
        Ok(())
    }
}
