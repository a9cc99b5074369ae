use std::sync::Arc;

use shared::services::auth_service::AuthService;
use shared::services::session_coordinator::SessionCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub coordinator: Arc<SessionCoordinator>,
}
