use std::fmt;

use crate::config::ConfigError;

#[derive(Debug)]
pub enum AuthServiceError {
    Config(ConfigError),
    /// No usable bearer credentials were presented.
    InvalidCredentials,
    JwtError(String),
    ValidationError(String),
    InvalidToken,
    ExpiredToken,
}

impl fmt::Display for AuthServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthServiceError::Config(err) => write!(f, "Auth configuration error: {}", err),
            AuthServiceError::InvalidCredentials => write!(f, "Missing or malformed credentials"),
            AuthServiceError::JwtError(msg) => write!(f, "JWT error: {}", msg),
            AuthServiceError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AuthServiceError::InvalidToken => write!(f, "Invalid JWT token"),
            AuthServiceError::ExpiredToken => write!(f, "JWT token has expired"),
        }
    }
}

impl std::error::Error for AuthServiceError {}

impl From<ConfigError> for AuthServiceError {
    fn from(err: ConfigError) -> Self {
        AuthServiceError::Config(err)
    }
}
