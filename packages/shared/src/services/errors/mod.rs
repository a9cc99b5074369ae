pub mod auth_service_errors;
pub mod session_coordinator_errors;
