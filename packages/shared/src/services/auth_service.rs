use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};

use crate::config::{required, JWT_SECRET_ENV};
use crate::models::responses::TokenClaims;
use crate::services::errors::auth_service_errors::AuthServiceError;

#[cfg(test)]
use mockall::automock;

/// Verifies bearer tokens minted by the identity provider. Host ids are opaque:
/// whatever the token's `sub` carries is the caller's host id.
#[cfg_attr(test, automock)]
pub trait AuthServiceTrait: Send + Sync {
    fn verify_token(&self, token: &str) -> Result<TokenClaims, AuthServiceError>;
    fn extract_host_id_from_token(&self, token: &str) -> Result<String, AuthServiceError>;
}

pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn from_env() -> Result<Self, AuthServiceError> {
        let jwt_secret = required(JWT_SECRET_ENV)?;
        Ok(AuthService { jwt_secret })
    }

    pub fn with_jwt_secret(jwt_secret: String) -> Self {
        AuthService { jwt_secret }
    }

    /// Mints a token for `host_id`. Only local tooling and tests need this;
    /// production tokens come from the identity provider.
    pub fn issue_token(&self, host_id: &str, valid_for: Duration) -> Result<String, AuthServiceError> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: host_id.to_string(),
            exp: (now + valid_for).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_ref()),
        )
        .map_err(|e| AuthServiceError::JwtError(format!("{:#?}", e)))
    }
}

impl AuthServiceTrait for AuthService {
    fn verify_token(&self, token: &str) -> Result<TokenClaims, AuthServiceError> {
        let decoding_key = DecodingKey::from_secret(self.jwt_secret.as_ref());
        let validation = Validation::default();

        match decode::<TokenClaims>(token, &decoding_key, &validation) {
            Ok(token_data) => {
                let now = Utc::now().timestamp() as usize;
                if token_data.claims.exp < now {
                    Err(AuthServiceError::ExpiredToken)
                } else {
                    Ok(token_data.claims)
                }
            }
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Err(AuthServiceError::ExpiredToken)
                }
                _ => Err(AuthServiceError::InvalidToken),
            },
        }
    }

    fn extract_host_id_from_token(&self, token: &str) -> Result<String, AuthServiceError> {
        let claims = self.verify_token(token)?;
        if claims.sub.trim().is_empty() {
            return Err(AuthServiceError::ValidationError(
                "Token subject cannot be empty".to_string(),
            ));
        }
        Ok(claims.sub)
    }
}
