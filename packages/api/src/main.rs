use lambda_http::{run, tracing, Error};
use std::env::set_var;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use shared::clock::SystemClock;
use shared::config::StoreBackend;
use shared::repositories::build_repositories;
use shared::services::auth_service::AuthService;
use shared::services::session_coordinator::SessionCoordinator;

#[tokio::main]
async fn main() -> Result<(), Error> {
    set_var("AWS_LAMBDA_HTTP_IGNORE_STAGE_IN_PATH", "true");

    // required to enable CloudWatch error logging by the runtime
    tracing::init_default_subscriber();

    let backend = StoreBackend::from_env()?;
    let repositories = build_repositories(backend, None).await?;
    let coordinator = Arc::new(SessionCoordinator::new(
        repositories.invites,
        repositories.sessions,
        Arc::new(SystemClock),
    ));
    let auth_service = Arc::new(AuthService::from_env()?);

    let app_state = state::AppState {
        auth_service,
        coordinator,
    };

    // ToDo: Tighten this up
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(app_state).layer(cors);

    run(app).await
}
