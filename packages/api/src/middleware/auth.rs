use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{error::ApiError, state::AppState};
use shared::services::auth_service::AuthServiceTrait;
use shared::services::errors::auth_service_errors::AuthServiceError;

/// The host making the request, taken from the bearer token's subject.
#[derive(Debug, Clone)]
pub struct AuthenticatedHost {
    pub host_id: String,
}

impl FromRequestParts<AppState> for AuthenticatedHost {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .ok_or(ApiError::AuthService(AuthServiceError::InvalidCredentials))?
            .to_str()
            .map_err(|_| {
                ApiError::AuthService(AuthServiceError::ValidationError(
                    "Invalid header format".to_string(),
                ))
            })?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::AuthService(AuthServiceError::InvalidCredentials))?;

        let host_id = state
            .auth_service
            .extract_host_id_from_token(token)
            .map_err(ApiError::from)?;

        Ok(AuthenticatedHost { host_id })
    }
}
