//! Ephemeral session tokens (HS256 JWT).

use crate::config::AuthConfig;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer credentials")]
    MissingCredentials,

    #[error("Could not validate credentials: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub session_id: String,
    /// RFC 3339 issue time
    pub created_at: String,
    #[serde(rename = "type")]
    pub token_type: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Token response returned to the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Who is calling, as resolved from a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub session_id: String,
    pub anonymous: bool,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expire_minutes: i64,
    require_auth: bool,
}

/// 16 random bytes, URL-safe base64 without padding.
pub fn random_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret_key.as_bytes()),
            expire_minutes: config.expire_minutes,
            require_auth: config.require_auth,
        }
    }

    pub fn require_auth(&self) -> bool {
        self.require_auth
    }

    /// Issues a token bound to a fresh session id.
    pub fn issue_session_token(&self) -> Result<TokenResponse, AuthError> {
        let now = Utc::now();
        let claims = SessionClaims {
            session_id: random_session_id(),
            created_at: now.to_rfc3339(),
            token_type: "ephemeral".to_string(),
            exp: (now + Duration::minutes(self.expire_minutes)).timestamp(),
        };

        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        tracing::debug!(session_id = %claims.session_id, "Issued session token");

        Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
        })
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }

    /// Resolves the caller. With auth disabled every caller gets an
    /// anonymous random session id.
    pub fn resolve(&self, bearer: Option<&str>) -> Result<Caller, AuthError> {
        if !self.require_auth {
            return Ok(Caller {
                session_id: random_session_id(),
                anonymous: true,
            });
        }

        let token = bearer.ok_or(AuthError::MissingCredentials)?;
        let claims = self.verify(token)?;
        Ok(Caller {
            session_id: claims.session_id,
            anonymous: false,
        })
    }
}
