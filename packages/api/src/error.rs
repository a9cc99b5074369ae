use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::models::responses::{AlreadyResolvedResponse, ErrorResponse};
use shared::services::errors::{
    auth_service_errors::AuthServiceError, session_coordinator_errors::SessionCoordinatorError,
};

#[derive(Debug)]
pub enum ApiError {
    AuthService(AuthServiceError),
    Coordinator(SessionCoordinatorError),
    Unauthorized,
}

impl From<AuthServiceError> for ApiError {
    fn from(error: AuthServiceError) -> Self {
        ApiError::AuthService(error)
    }
}

impl From<SessionCoordinatorError> for ApiError {
    fn from(error: SessionCoordinatorError) -> Self {
        ApiError::Coordinator(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // A repeated request for something that already happened is a success.
        if let ApiError::Coordinator(SessionCoordinatorError::AlreadyResolved { session_id }) = self
        {
            let body = AlreadyResolvedResponse {
                already_resolved: true,
                session_id,
            };
            return (StatusCode::OK, Json(body)).into_response();
        }

        let status = match &self {
            ApiError::AuthService(AuthServiceError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
            ApiError::AuthService(AuthServiceError::ValidationError(_)) => StatusCode::BAD_REQUEST,
            ApiError::AuthService(AuthServiceError::Config(_) | AuthServiceError::JwtError(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::AuthService(
                AuthServiceError::InvalidToken | AuthServiceError::ExpiredToken,
            ) => StatusCode::UNAUTHORIZED,

            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,

            ApiError::Coordinator(SessionCoordinatorError::AlreadyResolved { .. }) => {
                StatusCode::OK
            }
            ApiError::Coordinator(SessionCoordinatorError::ValidationError(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Coordinator(SessionCoordinatorError::Unauthorized(_)) => {
                StatusCode::FORBIDDEN
            }
            ApiError::Coordinator(SessionCoordinatorError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Coordinator(
                SessionCoordinatorError::InvalidTransition(_)
                | SessionCoordinatorError::HostBusy(_)
                | SessionCoordinatorError::Conflict(_),
            ) => StatusCode::CONFLICT,
            ApiError::Coordinator(SessionCoordinatorError::SessionNoLongerJoinable(_)) => {
                StatusCode::GONE
            }
            ApiError::Coordinator(SessionCoordinatorError::RepositoryError(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Coordinator(SessionCoordinatorError::InconsistentState(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            ApiError::AuthService(e) => e.to_string(),
            ApiError::Coordinator(e) => e.to_string(),
            ApiError::Unauthorized => "Unauthorized".to_string(),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
