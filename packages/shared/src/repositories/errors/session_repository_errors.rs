#[derive(Debug)]
pub enum SessionRepositoryError {
    /// The invite being resolved was no longer pending.
    InviteNotPending,
    /// The session row no longer had the status (or participant count) the write was keyed on.
    StatusChanged,
    /// The host already holds a claim on another open session.
    HostBusy(String),
    Serialization(String),
    DynamoDb(String),
}

impl std::fmt::Display for SessionRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionRepositoryError::InviteNotPending => write!(f, "Invite is no longer pending"),
            SessionRepositoryError::StatusChanged => {
                write!(f, "Session changed before the update was applied")
            }
            SessionRepositoryError::HostBusy(host_id) => {
                write!(f, "Host {} is already in an open session", host_id)
            }
            SessionRepositoryError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            SessionRepositoryError::DynamoDb(msg) => write!(f, "DynamoDB error: {}", msg),
        }
    }
}

impl std::error::Error for SessionRepositoryError {}
