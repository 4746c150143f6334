//! Session tokens
//!
//! Refresh token records and the responses handed back by the session
//! manager.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A persisted refresh token.
///
/// Only the SHA-256 hash of the opaque value is stored. Tokens are never
/// deleted; consumed tokens keep `revoked_at` and point at their
/// replacement so reuse can be detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Shared by every token descending from one login
    pub family_id: Uuid,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
}

impl RefreshToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Not revoked and not yet expired
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }
}

/// Result of a successful login or refresh
#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub user_id: Uuid,
    pub access_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub roles: Vec<String>,
}

/// How much of a session `revoke` tears down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevokeScope {
    /// Only the presented token
    Single,
    /// Every active token of the presented token's family
    #[default]
    Family,
}
