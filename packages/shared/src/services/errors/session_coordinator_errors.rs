use crate::repositories::errors::invite_repository_errors::InviteRepositoryError;
use crate::repositories::errors::session_repository_errors::SessionRepositoryError;

#[derive(Debug)]
pub enum SessionCoordinatorError {
    /// The current status does not allow the requested transition.
    InvalidTransition(String),
    /// The operation already happened. Callers treat this as success.
    AlreadyResolved { session_id: Option<String> },
    Unauthorized(String),
    SessionNoLongerJoinable(String),
    NotFound(String),
    /// A host named in the operation is already in another open session.
    HostBusy(String),
    ValidationError(String),
    /// A concurrent writer changed the row between read and write. Safe to retry.
    Conflict(String),
    /// The store holds state no valid sequence of operations could produce.
    InconsistentState(String),
    RepositoryError(String),
}

impl SessionCoordinatorError {
    pub fn is_already_resolved(&self) -> bool {
        matches!(self, SessionCoordinatorError::AlreadyResolved { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionCoordinatorError::Conflict(_) | SessionCoordinatorError::RepositoryError(_)
        )
    }
}

impl std::fmt::Display for SessionCoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCoordinatorError::InvalidTransition(msg) => {
                write!(f, "Invalid transition: {}", msg)
            }
            SessionCoordinatorError::AlreadyResolved { session_id } => match session_id {
                Some(session_id) => write!(f, "Already resolved into session {}", session_id),
                None => write!(f, "Already resolved"),
            },
            SessionCoordinatorError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            SessionCoordinatorError::SessionNoLongerJoinable(msg) => {
                write!(f, "Session no longer joinable: {}", msg)
            }
            SessionCoordinatorError::NotFound(msg) => write!(f, "Not found: {}", msg),
            SessionCoordinatorError::HostBusy(host_id) => {
                write!(f, "Host {} is already in an open session", host_id)
            }
            SessionCoordinatorError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            SessionCoordinatorError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            SessionCoordinatorError::InconsistentState(msg) => {
                write!(f, "Inconsistent state: {}", msg)
            }
            SessionCoordinatorError::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
        }
    }
}

impl std::error::Error for SessionCoordinatorError {}

impl From<InviteRepositoryError> for SessionCoordinatorError {
    fn from(err: InviteRepositoryError) -> Self {
        match err {
            InviteRepositoryError::NotPending => {
                SessionCoordinatorError::Conflict("Invite is no longer pending".to_string())
            }
            other => SessionCoordinatorError::RepositoryError(other.to_string()),
        }
    }
}

impl From<SessionRepositoryError> for SessionCoordinatorError {
    fn from(err: SessionRepositoryError) -> Self {
        match err {
            SessionRepositoryError::HostBusy(host_id) => SessionCoordinatorError::HostBusy(host_id),
            SessionRepositoryError::InviteNotPending | SessionRepositoryError::StatusChanged => {
                SessionCoordinatorError::Conflict(err.to_string())
            }
            other => SessionCoordinatorError::RepositoryError(other.to_string()),
        }
    }
}
