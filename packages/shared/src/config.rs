use std::env;

pub const INVITES_TABLE_ENV: &str = "INVITES_TABLE";
pub const SESSIONS_TABLE_ENV: &str = "SESSIONS_TABLE";
pub const PARTICIPANTS_TABLE_ENV: &str = "PARTICIPANTS_TABLE";
pub const HOST_CLAIMS_TABLE_ENV: &str = "HOST_CLAIMS_TABLE";
pub const STORE_BACKEND_ENV: &str = "STORE_BACKEND";
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const HOST_CONNECTIONS_TABLE_ENV: &str = "HOST_CONNECTIONS_TABLE";
pub const WEBSOCKET_API_ENDPOINT_ENV: &str = "WEBSOCKET_API_ENDPOINT";

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { name: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "{} environment variable must be set", name),
            ConfigError::Invalid { name, value } => {
                write!(f, "{} has unsupported value '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    DynamoDb,
    Memory,
}

/// Table names for the four logical tables backing invites and sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub invites_table: String,
    pub sessions_table: String,
    pub participants_table: String,
    pub host_claims_table: String,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(StoreConfig {
            invites_table: required(INVITES_TABLE_ENV)?,
            sessions_table: required(SESSIONS_TABLE_ENV)?,
            participants_table: required(PARTICIPANTS_TABLE_ENV)?,
            host_claims_table: required(HOST_CLAIMS_TABLE_ENV)?,
        })
    }
}

impl StoreBackend {
    /// Reads `STORE_BACKEND`; unset means DynamoDB.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(STORE_BACKEND_ENV) {
            Ok(value) => StoreBackend::parse(&value).ok_or(ConfigError::Invalid {
                name: STORE_BACKEND_ENV,
                value,
            }),
            Err(_) => Ok(StoreBackend::DynamoDb),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dynamodb" => Some(StoreBackend::DynamoDb),
            "memory" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

pub fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}
