pub mod health;
pub mod invites;
pub mod sessions;

use axum::{routing::get, Router};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(invites::routes())
        .merge(sessions::routes())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::{body::Body, response::Response, Router};
    use serde_json::Value;

    use crate::state::AppState;
    use shared::clock::SystemClock;
    use shared::repositories::memory::InMemoryStore;
    use shared::services::auth_service::AuthService;
    use shared::services::session_coordinator::SessionCoordinator;

    const TEST_SECRET: &str = "test-secret";

    pub fn test_app() -> (Router, AuthService) {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = SessionCoordinator::new(store.clone(), store, Arc::new(SystemClock));
        let state = AppState {
            auth_service: Arc::new(AuthService::with_jwt_secret(TEST_SECRET.to_string())),
            coordinator: Arc::new(coordinator),
        };

        (
            super::router(state),
            AuthService::with_jwt_secret(TEST_SECRET.to_string()),
        )
    }

    pub fn bearer(auth: &AuthService, host_id: &str) -> String {
        let token = auth
            .issue_token(host_id, chrono::Duration::minutes(5))
            .unwrap();
        format!("Bearer {}", token)
    }

    pub async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
