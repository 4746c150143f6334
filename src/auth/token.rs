//! Access tokens
//!
//! Stateless HS256 access tokens. A token is valid when its signature
//! checks out and the injected clock is strictly before `exp`; nothing is
//! looked up.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AuthSettings;
use crate::domain::User;
use crate::error::{AppError, AppResult};

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub jti: String,
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// A freshly signed access token
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
}

/// Mints and validates access tokens
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    lifetime_minutes: i64,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(settings: &AuthSettings, clock: Arc<dyn Clock>) -> Self {
        let secret = settings.jwt_secret.as_bytes();

        // Expiry is checked against `clock` in `validate`; issuer and
        // audience are a deployment concern and not verified here.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = ["exp", "sub"]
            .into_iter()
            .map(String::from)
            .collect::<HashSet<_>>();

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: settings.jwt_issuer.clone(),
            audience: settings.jwt_audience.clone(),
            lifetime_minutes: settings.access_token_minutes,
            clock,
        }
    }

    /// Sign a token for `user` carrying `roles` in order
    pub fn issue(&self, user: &User, roles: &BTreeSet<String>) -> AppResult<IssuedAccessToken> {
        let now = self.clock.now().timestamp();
        let expires_in = self.lifetime_minutes * 60;

        let claims = AccessClaims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            name: user.full_name.clone(),
            jti: Uuid::new_v4().to_string(),
            roles: roles.iter().cloned().collect(),
            iat: now,
            exp: now + expires_in,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )
        .map_err(|e| AppError::Internal(format!("Failed to sign access token: {}", e)))?;

        Ok(IssuedAccessToken { token, expires_in })
    }

    /// Subject of a token that is correctly signed and unexpired
    pub fn validate(&self, token: &str) -> Option<Uuid> {
        let claims = self.decode(token)?;
        if self.clock.now().timestamp() >= claims.exp {
            tracing::debug!(jti = %claims.jti, "Access token expired");
            return None;
        }
        claims.sub.parse().ok()
    }

    /// Subject of a correctly signed token, expired or not
    pub fn subject_ignoring_expiry(&self, token: &str) -> Option<Uuid> {
        self.decode(token)?.sub.parse().ok()
    }

    /// Full claim set of a correctly signed token, expired or not
    pub fn decode(&self, token: &str) -> Option<AccessClaims> {
        match jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "Rejected access token");
                None
            }
        }
    }
}
