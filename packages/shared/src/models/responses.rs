use serde::{Deserialize, Serialize};

use crate::models::live_session::LiveSession;

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Returned instead of an error when the requested outcome already happened.
#[derive(Debug, Deserialize, Serialize)]
pub struct AlreadyResolvedResponse {
    pub already_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RematchResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RoomNameResponse {
    pub room_name: String,
}

/// A host's open session together with the countdown the client should show.
#[derive(Debug, Deserialize, Serialize)]
pub struct ActiveSessionResponse {
    pub session: Option<LiveSession>,
    pub room_name: Option<String>,
    pub remaining_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenClaims {
    pub sub: String, // subject (host ID)
    pub exp: usize,  // expiration time
    pub iat: usize,  // issued at
}
