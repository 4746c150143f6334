//! User accounts
//!
//! Profile data plus the credential record that gates login.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role granted to every registered user
pub const ROLE_USER: &str = "User";

/// Role allowed to read any campaign's pledges
pub const ROLE_ADMIN: &str = "Admin";

/// Public user profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub is_active: bool,
    /// Ordered so the serialized claim list is stable
    pub roles: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }
}

/// Login gating state held alongside a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// argon2id PHC string
    pub password_hash: String,
    pub is_approved: bool,
    pub email_confirmed: bool,
    pub failed_login_count: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }
}

/// A user together with its credentials
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub user: User,
    pub credentials: CredentialRecord,
}

/// Data needed to insert a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub is_approved: bool,
    pub email_confirmed: bool,
    pub roles: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// Registration input, already shape-validated upstream
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub full_name: String,
    pub password: String,
}

/// Lower-cased, trimmed email used for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
