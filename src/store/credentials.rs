//! Credential store
//!
//! User records and refresh-token state. Refresh-token mutations are
//! conditional writes so concurrent rotations of one token cannot both win.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{NewUser, RefreshToken, User, UserAccount};
use crate::error::AppResult;

/// When repeated login failures lock an account
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_logins: i32,
    pub lockout: Duration,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Lookup by normalized email
    async fn find_account_by_email(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<UserAccount>>;

    async fn find_account(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<UserAccount>>;

    async fn email_exists(&self, email: &str, cancel: &CancellationToken) -> AppResult<bool>;

    /// Insert a user; `AppError::DuplicatedEmail` if the email is taken
    async fn create_user(&self, user: NewUser, cancel: &CancellationToken) -> AppResult<User>;

    /// Count a wrong password. Returns true when this failure locked the
    /// account.
    async fn record_failed_login(
        &self,
        user_id: Uuid,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<bool>;

    async fn reset_failed_logins(&self, user_id: Uuid, cancel: &CancellationToken)
        -> AppResult<()>;

    async fn insert_refresh_token(
        &self,
        token: &RefreshToken,
        cancel: &CancellationToken,
    ) -> AppResult<()>;

    async fn find_refresh_token(
        &self,
        token_hash: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<RefreshToken>>;

    /// Atomically revoke the active token `presented_hash` (owned by
    /// `replacement.user_id`), point it at `replacement` and insert the
    /// replacement. Returns false, writing nothing, if the presented token
    /// was not active at `now`.
    async fn rotate_refresh_token(
        &self,
        presented_hash: &str,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<bool>;

    /// Revoke one token. Returns false if it was already revoked or absent.
    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<bool>;

    /// Revoke every unrevoked token of a family; returns how many
    async fn revoke_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<u64>;

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<u64>;
}
