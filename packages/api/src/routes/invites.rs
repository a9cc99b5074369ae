use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lambda_http::tracing::{debug, error};

use crate::{error::ApiError, middleware::auth::AuthenticatedHost, state::AppState};
use shared::models::invite::{InviteResolution, SessionInvite};
use shared::models::requests::{IssueInviteRequest, RespondToInviteRequest};
use shared::services::session_coordinator::{parse_decision, parse_session_kind};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/invites", post(issue_invite))
        .route("/invites/pending", get(pending_invites))
        .route("/invites/{invite_id}/respond", post(respond_to_invite))
        .route("/invites/{invite_id}/cancel", post(cancel_invite))
}

async fn issue_invite(
    State(state): State<AppState>,
    host: AuthenticatedHost,
    Json(payload): Json<IssueInviteRequest>,
) -> Result<(StatusCode, Json<SessionInvite>), ApiError> {
    let (session_type, mode) = parse_session_kind(&payload.session_type, &payload.mode)?;

    let invite = state
        .coordinator
        .issue_invite(
            &host.host_id,
            &payload.to_host_id,
            session_type,
            mode,
            payload.session_id.as_deref(),
        )
        .await
        .map_err(|e| {
            error!(
                "Failed to issue invite from {} to {}: {}",
                host.host_id, payload.to_host_id, e
            );
            ApiError::from(e)
        })?;

    debug!("Invite {} issued by {}", invite.id, host.host_id);
    Ok((StatusCode::CREATED, Json(invite)))
}

async fn pending_invites(
    State(state): State<AppState>,
    host: AuthenticatedHost,
) -> Result<Json<Vec<SessionInvite>>, ApiError> {
    let invites = state
        .coordinator
        .pending_invites(&host.host_id)
        .await
        .map_err(|e| {
            error!("Failed to list pending invites for {}: {}", host.host_id, e);
            ApiError::from(e)
        })?;

    Ok(Json(invites))
}

async fn respond_to_invite(
    State(state): State<AppState>,
    host: AuthenticatedHost,
    Path(invite_id): Path<String>,
    Json(payload): Json<RespondToInviteRequest>,
) -> Result<Json<InviteResolution>, ApiError> {
    let decision = parse_decision(&payload.decision)?;

    let resolution = state
        .coordinator
        .respond_to_invite(&host.host_id, &invite_id, decision)
        .await
        .map_err(|e| {
            if !e.is_already_resolved() {
                error!(
                    "Failed to respond to invite {} for {}: {}",
                    invite_id, host.host_id, e
                );
            }
            ApiError::from(e)
        })?;

    debug!(
        "Host {} answered invite {} with {}",
        host.host_id,
        invite_id,
        resolution.status.as_str()
    );
    Ok(Json(resolution))
}

async fn cancel_invite(
    State(state): State<AppState>,
    host: AuthenticatedHost,
    Path(invite_id): Path<String>,
) -> Result<Json<SessionInvite>, ApiError> {
    let invite = state
        .coordinator
        .cancel_invite(&host.host_id, &invite_id)
        .await
        .map_err(|e| {
            error!(
                "Failed to cancel invite {} for {}: {}",
                invite_id, host.host_id, e
            );
            ApiError::from(e)
        })?;

    Ok(Json(invite))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use lambda_http::tower::ServiceExt;
    use serde_json::{json, Value};

    use crate::routes::test_support::{body_json, bearer, test_app};

    #[tokio::test]
    async fn test_issue_invite_requires_token() {
        let (app, _) = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/invites")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"to_host_id": "host-b", "type": "battle", "mode": "speed"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_issue_and_accept_invite() {
        let (app, auth) = test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/invites")
                    .header("content-type", "application/json")
                    .header("Authorization", bearer(&auth, "host-a"))
                    .body(Body::from(
                        json!({"to_host_id": "host-b", "type": "battle", "mode": "speed"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        let invite = body_json(response).await;
        let invite_id = invite["id"].as_str().unwrap().to_string();
        assert_eq!(invite["status"], "pending");

        let pending = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/invites/pending")
                    .header("Authorization", bearer(&auth, "host-b"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(pending).await.as_array().unwrap().len(), 1);

        let respond = |token: String| {
            Request::builder()
                .method("POST")
                .uri(format!("/invites/{}/respond", invite_id))
                .header("content-type", "application/json")
                .header("Authorization", token)
                .body(Body::from(json!({"decision": "accepted"}).to_string()))
                .unwrap()
        };

        let accepted = app
            .clone()
            .oneshot(respond(bearer(&auth, "host-b")))
            .await
            .unwrap();
        assert_eq!(accepted.status(), 200);
        let resolution: Value = body_json(accepted).await;
        assert_eq!(resolution["status"], "accepted");
        let session_id = resolution["session_id"].as_str().unwrap().to_string();

        // The retry lands on the same session.
        let retried = app
            .clone()
            .oneshot(respond(bearer(&auth, "host-b")))
            .await
            .unwrap();
        assert_eq!(retried.status(), 200);
        let retried: Value = body_json(retried).await;
        assert_eq!(retried["already_resolved"], true);
        assert_eq!(retried["session_id"], session_id.as_str());

        let by_stranger = app.oneshot(respond(bearer(&auth, "host-z"))).await.unwrap();
        assert_eq!(by_stranger.status(), 403);
    }

    #[tokio::test]
    async fn test_unknown_decision_is_bad_request() {
        let (app, auth) = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/invites/missing/respond")
                    .header("content-type", "application/json")
                    .header("Authorization", bearer(&auth, "host-b"))
                    .body(Body::from(json!({"decision": "maybe"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
    }
}
