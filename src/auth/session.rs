//! Session manager
//!
//! Login, refresh-token rotation, revocation and registration.
//!
//! A session moves `Anonymous -> Authenticated -> Refreshed* -> Revoked`.
//! Each login starts a token family; every refresh consumes the presented
//! token and chains it to its replacement inside one conditional store
//! write, so a refresh token is single-use even under concurrent requests.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::crypto::{generate_refresh_token, hash_password, hash_refresh_token, verify_password};
use super::token::TokenIssuer;
use crate::clock::Clock;
use crate::config::AuthSettings;
use crate::domain::{
    normalize_email, AuthTokens, NewUser, RefreshToken, RegisterRequest, RevokeScope, User,
    ROLE_USER,
};
use crate::error::{AppError, AppResult};
use crate::store::{CredentialStore, LockoutPolicy};

/// Verified against when the email is unknown so both failure paths cost
/// one argon2 verification
const DUMMY_PASSWORD: &str = "dummy-password-for-timing";

pub struct AuthSessionManager {
    store: Arc<dyn CredentialStore>,
    tokens: TokenIssuer,
    clock: Arc<dyn Clock>,
    settings: AuthSettings,
    dummy_hash: String,
}

impl AuthSessionManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        settings: AuthSettings,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        Ok(Self {
            tokens: TokenIssuer::new(&settings, clock.clone()),
            dummy_hash: hash_password(DUMMY_PASSWORD)?,
            store,
            clock,
            settings,
        })
    }

    pub fn token_issuer(&self) -> &TokenIssuer {
        &self.tokens
    }

    fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_failed_logins: self.settings.max_failed_logins,
            lockout: Duration::minutes(self.settings.lockout_minutes),
        }
    }

    /// Authenticate with email and password and start a new session
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> AppResult<AuthTokens> {
        let email = normalize_email(email);
        let now = self.clock.now();

        let Some(account) = self.store.find_account_by_email(&email, cancel).await? else {
            verify_password(password, &self.dummy_hash);
            tracing::debug!("Login for unknown email");
            return Err(AppError::InvalidCredentials);
        };
        let user_id = account.user.id;
        let credentials = &account.credentials;

        if !verify_password(password, &credentials.password_hash) {
            // Failures during a lockout do not extend it
            if !credentials.is_locked_out(now) {
                let locked = self
                    .store
                    .record_failed_login(user_id, self.lockout_policy(), now, cancel)
                    .await?;
                if locked {
                    tracing::warn!(
                        user_id = %user_id,
                        lockout_minutes = self.settings.lockout_minutes,
                        "Account locked after repeated login failures"
                    );
                }
            }
            tracing::debug!(user_id = %user_id, "Login with wrong password");
            return Err(AppError::InvalidCredentials);
        }

        if credentials.is_locked_out(now) {
            tracing::info!(user_id = %user_id, "Login rejected: account locked");
            return Err(AppError::LockedOut);
        }
        if !account.user.is_active || !credentials.is_approved {
            tracing::info!(user_id = %user_id, "Login rejected: account not approved");
            return Err(AppError::NotApproved);
        }
        if self.settings.require_confirmed_email && !credentials.email_confirmed {
            tracing::info!(user_id = %user_id, "Login rejected: email not confirmed");
            return Err(AppError::EmailNotConfirmed);
        }

        if credentials.failed_login_count > 0 || credentials.locked_until.is_some() {
            self.store.reset_failed_logins(user_id, cancel).await?;
        }

        let family_id = Uuid::new_v4();
        let (tokens, refresh) = self.mint(&account.user, family_id, now)?;
        self.store.insert_refresh_token(&refresh, cancel).await?;

        tracing::info!(
            user_id = %user_id,
            family_id = %family_id,
            "User logged in"
        );

        Ok(tokens)
    }

    /// Exchange a refresh token for a new access/refresh pair.
    ///
    /// The access token may be expired but must carry a valid signature.
    pub async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> AppResult<AuthTokens> {
        let user_id = self
            .tokens
            .subject_ignoring_expiry(access_token)
            .ok_or(AppError::InvalidAccessToken)?;
        let now = self.clock.now();
        let presented_hash = hash_refresh_token(refresh_token);

        let stored = self
            .store
            .find_refresh_token(&presented_hash, cancel)
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or(AppError::InvalidRefreshToken)?;

        if stored.is_revoked() {
            if self.rotated_within_grace(&stored, now) {
                tracing::debug!(user_id = %user_id, "Refresh token consumed concurrently");
            } else {
                self.handle_reuse(&stored, now, cancel).await?;
            }
            return Err(AppError::InvalidRefreshToken);
        }
        if stored.is_expired(now) {
            tracing::debug!(user_id = %user_id, "Refresh with expired token");
            return Err(AppError::InvalidRefreshToken);
        }

        let account = self
            .store
            .find_account(user_id, cancel)
            .await?
            .ok_or(AppError::InvalidRefreshToken)?;
        if !account.user.is_active || !account.credentials.is_approved {
            let revoked = self.store.revoke_family(stored.family_id, now, cancel).await?;
            tracing::info!(
                user_id = %user_id,
                revoked,
                "Refresh rejected: account no longer approved"
            );
            return Err(AppError::InvalidRefreshToken);
        }

        let (tokens, replacement) = self.mint(&account.user, stored.family_id, now)?;

        let rotated = self
            .store
            .rotate_refresh_token(&presented_hash, &replacement, now, cancel)
            .await?;
        if !rotated {
            // Lost a race against a concurrent refresh of the same token
            tracing::debug!(user_id = %user_id, "Refresh token consumed concurrently");
            return Err(AppError::InvalidRefreshToken);
        }

        tracing::info!(
            user_id = %user_id,
            family_id = %stored.family_id,
            "Refresh token rotated"
        );

        Ok(tokens)
    }

    /// Revoke the presented refresh token, or its whole family depending on
    /// the configured scope. Revoking an already revoked token succeeds.
    pub async fn revoke(
        &self,
        access_token: &str,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let user_id = self
            .tokens
            .subject_ignoring_expiry(access_token)
            .ok_or(AppError::InvalidAccessToken)?;
        let now = self.clock.now();
        let token_hash = hash_refresh_token(refresh_token);

        let stored = self
            .store
            .find_refresh_token(&token_hash, cancel)
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or(AppError::InvalidRefreshToken)?;

        let revoked = match self.settings.revoke_scope {
            RevokeScope::Single => {
                u64::from(self.store.revoke_refresh_token(&token_hash, now, cancel).await?)
            }
            RevokeScope::Family => self.store.revoke_family(stored.family_id, now, cancel).await?,
        };

        tracing::info!(
            user_id = %user_id,
            family_id = %stored.family_id,
            scope = ?self.settings.revoke_scope,
            revoked,
            "Refresh token revoked"
        );

        Ok(())
    }

    /// Revoke every active refresh token of `user_id`
    pub async fn revoke_all(&self, user_id: Uuid, cancel: &CancellationToken) -> AppResult<u64> {
        let revoked = self
            .store
            .revoke_all_for_user(user_id, self.clock.now(), cancel)
            .await?;

        tracing::info!(user_id = %user_id, revoked, "All sessions revoked");
        Ok(revoked)
    }

    /// Create a user with the default role. No tokens are issued.
    pub async fn register(
        &self,
        request: RegisterRequest,
        cancel: &CancellationToken,
    ) -> AppResult<User> {
        let email = normalize_email(&request.email);

        if self.store.email_exists(&email, cancel).await? {
            return Err(AppError::DuplicatedEmail);
        }

        let user = self
            .store
            .create_user(
                NewUser {
                    id: Uuid::new_v4(),
                    email,
                    full_name: request.full_name.trim().to_string(),
                    password_hash: hash_password(&request.password)?,
                    is_approved: self.settings.auto_approve_users,
                    email_confirmed: false,
                    roles: BTreeSet::from([ROLE_USER.to_string()]),
                    created_at: self.clock.now(),
                },
                cancel,
            )
            .await?;

        tracing::info!(
            user_id = %user.id,
            approved = self.settings.auto_approve_users,
            "User registered"
        );

        Ok(user)
    }

    /// True when `stored` was consumed by a rotation moments ago, which is
    /// what a client retry or a second tab racing the winner looks like
    fn rotated_within_grace(&self, stored: &RefreshToken, now: DateTime<Utc>) -> bool {
        match (stored.replaced_by, stored.revoked_at) {
            (Some(_), Some(revoked_at)) => {
                now - revoked_at < Duration::seconds(self.settings.reuse_grace_seconds)
            }
            _ => false,
        }
    }

    async fn handle_reuse(
        &self,
        stored: &RefreshToken,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        tracing::warn!(
            user_id = %stored.user_id,
            family_id = %stored.family_id,
            "Revoked refresh token presented again"
        );

        if self.settings.revoke_family_on_reuse {
            let revoked = self.store.revoke_family(stored.family_id, now, cancel).await?;
            tracing::warn!(
                family_id = %stored.family_id,
                revoked,
                "Token family revoked after reuse"
            );
        }
        Ok(())
    }

    /// Sign an access token and build the refresh token record that goes
    /// with it
    fn mint(
        &self,
        user: &User,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<(AuthTokens, RefreshToken)> {
        let access = self.tokens.issue(user, &user.roles)?;
        let (raw, token_hash) = generate_refresh_token();
        let expires_at = now + Duration::days(self.settings.refresh_token_days);

        let record = RefreshToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            family_id,
            token_hash,
            created_at: now,
            expires_at,
            revoked_at: None,
            replaced_by: None,
        };

        let tokens = AuthTokens {
            user_id: user.id,
            access_token: access.token,
            expires_in: access.expires_in,
            refresh_token: raw,
            refresh_token_expires_at: expires_at,
            roles: user.roles.iter().cloned().collect(),
        };

        Ok((tokens, record))
    }
}
