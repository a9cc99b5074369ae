use async_trait::async_trait;

use crate::models::invite::SessionInvite;
use crate::models::live_session::LiveSession;
use crate::models::participant::SessionParticipant;
use crate::services::errors::session_coordinator_errors::SessionCoordinatorError;
use crate::services::session_coordinator::SessionCoordinator;

#[cfg(test)]
use mockall::automock;

/// The slice of the coordinator a watcher talks to.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionGateway: Send + Sync {
    async fn active_session_for_host(
        &self,
        host_id: &str,
    ) -> Result<Option<LiveSession>, SessionCoordinatorError>;

    async fn session_participants(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionParticipant>, SessionCoordinatorError>;

    async fn pending_invites(
        &self,
        host_id: &str,
    ) -> Result<Vec<SessionInvite>, SessionCoordinatorError>;

    async fn transition_to_cooldown(
        &self,
        caller_id: &str,
        session_id: &str,
    ) -> Result<LiveSession, SessionCoordinatorError>;
}

#[async_trait]
impl SessionGateway for SessionCoordinator {
    async fn active_session_for_host(
        &self,
        host_id: &str,
    ) -> Result<Option<LiveSession>, SessionCoordinatorError> {
        self.get_active_session_for_host(host_id).await
    }

    async fn session_participants(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionParticipant>, SessionCoordinatorError> {
        self.get_session_participants(session_id).await
    }

    async fn pending_invites(
        &self,
        host_id: &str,
    ) -> Result<Vec<SessionInvite>, SessionCoordinatorError> {
        SessionCoordinator::pending_invites(self, host_id).await
    }

    async fn transition_to_cooldown(
        &self,
        caller_id: &str,
        session_id: &str,
    ) -> Result<LiveSession, SessionCoordinatorError> {
        SessionCoordinator::transition_to_cooldown(self, caller_id, session_id).await
    }
}
