use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IssueInviteRequest {
    pub to_host_id: String,
    #[serde(rename = "type")]
    pub session_type: String,
    pub mode: String,
    /// Present when inviting the recipient into the caller's running session.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RespondToInviteRequest {
    pub decision: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndSessionRequest {
    #[serde(default = "default_end_reason")]
    pub reason: String,
}

fn default_end_reason() -> String {
    "end".to_string()
}
