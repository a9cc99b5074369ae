pub mod auth_service;
pub mod errors;
pub mod session_coordinator;
