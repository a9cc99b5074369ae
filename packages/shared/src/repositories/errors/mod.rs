pub mod invite_repository_errors;
pub mod session_repository_errors;
