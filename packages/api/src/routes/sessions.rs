use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lambda_http::tracing::{debug, error, info};

use crate::{error::ApiError, middleware::auth::AuthenticatedHost, state::AppState};
use shared::models::live_session::LiveSession;
use shared::models::participant::SessionParticipant;
use shared::models::requests::EndSessionRequest;
use shared::models::responses::{ActiveSessionResponse, RematchResponse, RoomNameResponse};
use shared::services::session_coordinator::{parse_end_reason, SessionCoordinator};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions/{session_id}", get(get_session))
        .route("/sessions/{session_id}/participants", get(get_participants))
        .route("/sessions/{session_id}/room", get(get_room_name))
        .route("/sessions/{session_id}/cooldown", post(start_cooldown))
        .route("/sessions/{session_id}/end", post(end_session))
        .route("/sessions/{session_id}/rematch", post(start_rematch))
        .route("/hosts/{host_id}/session", get(get_active_session))
}

async fn get_session(
    State(state): State<AppState>,
    _host: AuthenticatedHost,
    Path(session_id): Path<String>,
) -> Result<Json<LiveSession>, ApiError> {
    let session = state.coordinator.get_session(&session_id).await?;
    Ok(Json(session))
}

async fn get_participants(
    State(state): State<AppState>,
    _host: AuthenticatedHost,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<SessionParticipant>>, ApiError> {
    let participants = state
        .coordinator
        .get_session_participants(&session_id)
        .await
        .map_err(|e| {
            error!("Failed to list participants of {}: {}", session_id, e);
            ApiError::from(e)
        })?;

    Ok(Json(participants))
}

async fn get_room_name(
    State(state): State<AppState>,
    _host: AuthenticatedHost,
    Path(session_id): Path<String>,
) -> Result<Json<RoomNameResponse>, ApiError> {
    let session = state.coordinator.get_session(&session_id).await?;

    Ok(Json(RoomNameResponse {
        room_name: SessionCoordinator::get_session_room_name(
            &session.session_id,
            session.session_type,
        ),
    }))
}

async fn start_cooldown(
    State(state): State<AppState>,
    host: AuthenticatedHost,
    Path(session_id): Path<String>,
) -> Result<Json<LiveSession>, ApiError> {
    let session = state
        .coordinator
        .transition_to_cooldown(&host.host_id, &session_id)
        .await
        .map_err(|e| {
            error!(
                "Failed to move session {} to cooldown for {}: {}",
                session_id, host.host_id, e
            );
            ApiError::from(e)
        })?;

    debug!(
        "Session {} is {} after cooldown request from {}",
        session_id,
        session.status.as_str(),
        host.host_id
    );
    Ok(Json(session))
}

async fn end_session(
    State(state): State<AppState>,
    host: AuthenticatedHost,
    Path(session_id): Path<String>,
    Json(payload): Json<EndSessionRequest>,
) -> Result<Json<LiveSession>, ApiError> {
    let reason = parse_end_reason(&payload.reason)?;

    let session = state
        .coordinator
        .end_session(&host.host_id, &session_id, reason)
        .await
        .map_err(|e| {
            error!(
                "Failed to end session {} for {}: {}",
                session_id, host.host_id, e
            );
            ApiError::from(e)
        })?;

    Ok(Json(session))
}

async fn start_rematch(
    State(state): State<AppState>,
    host: AuthenticatedHost,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<RematchResponse>), ApiError> {
    let rematch_id = state
        .coordinator
        .start_rematch(&host.host_id, &session_id)
        .await
        .map_err(|e| {
            if !e.is_already_resolved() {
                error!(
                    "Failed to rematch session {} for {}: {}",
                    session_id, host.host_id, e
                );
            }
            ApiError::from(e)
        })?;

    info!("Session {} rematched into {}", session_id, rematch_id);
    Ok((
        StatusCode::CREATED,
        Json(RematchResponse {
            session_id: rematch_id,
        }),
    ))
}

/// Any authenticated caller may look up a host's session, which is how
/// viewers follow a broadcast they are not part of.
async fn get_active_session(
    State(state): State<AppState>,
    _host: AuthenticatedHost,
    Path(host_id): Path<String>,
) -> Result<Json<ActiveSessionResponse>, ApiError> {
    let session = state
        .coordinator
        .get_active_session_for_host(&host_id)
        .await
        .map_err(|e| {
            error!("Failed to look up the session of {}: {}", host_id, e);
            ApiError::from(e)
        })?;

    let response = match session {
        Some(session) => ActiveSessionResponse {
            remaining_seconds: state
                .coordinator
                .get_remaining_seconds(session.current_deadline()),
            room_name: Some(session.room_name()),
            session: Some(session),
        },
        None => ActiveSessionResponse {
            session: None,
            room_name: None,
            remaining_seconds: 0,
        },
    };

    Ok(Json(response))
}
