#[derive(Debug)]
pub enum InviteRepositoryError {
    /// The conditional write lost: the invite was no longer pending.
    NotPending,
    Serialization(String),
    DynamoDb(String),
}

impl std::fmt::Display for InviteRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InviteRepositoryError::NotPending => write!(f, "Invite is no longer pending"),
            InviteRepositoryError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            InviteRepositoryError::DynamoDb(msg) => write!(f, "DynamoDB error: {}", msg),
        }
    }
}

impl std::error::Error for InviteRepositoryError {}
