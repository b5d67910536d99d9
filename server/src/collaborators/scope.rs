//! Bearer Token Scope Provider
//!
//! Decodes HS256 access tokens whose claims carry the principal's role and
//! academic scope. Token issuance lives in the identity service; the
//! encoder here exists for that service's tests and tooling.

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ScopeProvider;
use crate::config::Config;
use crate::error::PolicyError;
use crate::models::{Principal, Role};

/// Access token claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScopeClaims {
    /// Subject (user ID as UUID string).
    pub sub: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Uuid>,
}

/// [`ScopeProvider`] reading `Authorization: Bearer` tokens.
#[derive(Clone)]
pub struct JwtScopeProvider {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
}

impl JwtScopeProvider {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.jwt_secret)
    }

    /// Sign a token for a principal.
    pub fn issue(&self, principal: &Principal, exp: i64) -> anyhow::Result<String> {
        let claims = ScopeClaims {
            sub: principal.id.to_string(),
            exp,
            role: principal.role,
            track: principal.home_track_id,
            level: principal.home_level_id,
        };
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }
}

#[async_trait]
impl ScopeProvider for JwtScopeProvider {
    async fn resolve_principal(&self, credentials: &str) -> Result<Principal, PolicyError> {
        let token = credentials
            .strip_prefix("Bearer ")
            .unwrap_or(credentials)
            .trim();

        let data = decode::<ScopeClaims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            PolicyError::forbidden("invalid credentials")
        })?;

        let claims = data.claims;
        let id = Uuid::parse_str(&claims.sub)
            .map_err(|_| PolicyError::forbidden("invalid credentials"))?;

        Principal::new(id, claims.role, claims.track, claims.level)
    }
}
