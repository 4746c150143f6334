use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ensure_live;
use crate::domain::{CredentialRecord, NewUser, RefreshToken, User, UserAccount};
use crate::error::{AppError, AppResult};
use crate::store::{CredentialStore, LockoutPolicy};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<Uuid, UserAccount>,
    ids_by_email: HashMap<String, Uuid>,
    /// Keyed by token hash
    tokens: HashMap<String, RefreshToken>,
}

impl State {
    fn revoke_matching(&mut self, now: DateTime<Utc>, pred: impl Fn(&RefreshToken) -> bool) -> u64 {
        let mut revoked = 0;
        for token in self.tokens.values_mut() {
            if token.revoked_at.is_none() && pred(token) {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        revoked
    }
}

/// Credential store held in process memory
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: Mutex<State>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the credential record of an existing user
    pub async fn set_credentials(&self, user_id: Uuid, credentials: CredentialRecord) -> bool {
        let mut state = self.state.lock().await;
        match state.accounts.get_mut(&user_id) {
            Some(account) => {
                account.credentials = credentials;
                true
            }
            None => false,
        }
    }

    pub async fn account(&self, user_id: Uuid) -> Option<UserAccount> {
        self.state.lock().await.accounts.get(&user_id).cloned()
    }

    /// Every refresh token ever issued to `user_id`, oldest first
    pub async fn tokens_for_user(&self, user_id: Uuid) -> Vec<RefreshToken> {
        let state = self.state.lock().await;
        let mut tokens: Vec<_> = state
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| (t.created_at, t.id));
        tokens
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_account_by_email(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<UserAccount>> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;
        Ok(state
            .ids_by_email
            .get(email)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn find_account(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<UserAccount>> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;
        Ok(state.accounts.get(&user_id).cloned())
    }

    async fn email_exists(&self, email: &str, cancel: &CancellationToken) -> AppResult<bool> {
        ensure_live(cancel)?;
        Ok(self.state.lock().await.ids_by_email.contains_key(email))
    }

    async fn create_user(&self, user: NewUser, cancel: &CancellationToken) -> AppResult<User> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;

        if state.ids_by_email.contains_key(&user.email) {
            return Err(AppError::DuplicatedEmail);
        }

        let account = UserAccount {
            user: User {
                id: user.id,
                email: user.email.clone(),
                full_name: user.full_name,
                is_active: true,
                roles: user.roles,
                created_at: user.created_at,
            },
            credentials: CredentialRecord {
                password_hash: user.password_hash,
                is_approved: user.is_approved,
                email_confirmed: user.email_confirmed,
                failed_login_count: 0,
                locked_until: None,
            },
        };
        let created = account.user.clone();

        state.ids_by_email.insert(user.email, user.id);
        state.accounts.insert(user.id, account);

        Ok(created)
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;

        let Some(account) = state.accounts.get_mut(&user_id) else {
            return Ok(false);
        };
        let credentials = &mut account.credentials;

        if credentials.failed_login_count + 1 >= policy.max_failed_logins {
            credentials.failed_login_count = 0;
            credentials.locked_until = Some(now + policy.lockout);
            Ok(true)
        } else {
            credentials.failed_login_count += 1;
            Ok(false)
        }
    }

    async fn reset_failed_logins(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.get_mut(&user_id) {
            account.credentials.failed_login_count = 0;
            account.credentials.locked_until = None;
        }
        Ok(())
    }

    async fn insert_refresh_token(
        &self,
        token: &RefreshToken,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;
        if state.tokens.contains_key(&token.token_hash) {
            return Err(AppError::Internal("Duplicate refresh token hash".to_string()));
        }
        state.tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<RefreshToken>> {
        ensure_live(cancel)?;
        Ok(self.state.lock().await.tokens.get(token_hash).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        presented_hash: &str,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;

        if state.tokens.contains_key(&replacement.token_hash) {
            return Err(AppError::Internal("Duplicate refresh token hash".to_string()));
        }

        match state.tokens.get_mut(presented_hash) {
            Some(presented)
                if presented.user_id == replacement.user_id && presented.is_active(now) =>
            {
                presented.revoked_at = Some(now);
                presented.replaced_by = Some(replacement.id);
            }
            _ => return Ok(false),
        }

        state
            .tokens
            .insert(replacement.token_hash.clone(), replacement.clone());
        Ok(true)
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;
        match state.tokens.get_mut(token_hash) {
            Some(token) if token.revoked_at.is_none() => {
                token.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<u64> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;
        Ok(state.revoke_matching(now, |t| t.family_id == family_id))
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<u64> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;
        Ok(state.revoke_matching(now, |t| t.user_id == user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            full_name: "Test User".to_string(),
            password_hash: "hash".to_string(),
            is_approved: true,
            email_confirmed: true,
            roles: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    fn token(user_id: Uuid, family_id: Uuid, hash: &str, now: DateTime<Utc>) -> RefreshToken {
        RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            family_id,
            token_hash: hash.to_string(),
            created_at: now,
            expires_at: now + Duration::days(7),
            revoked_at: None,
            replaced_by: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryCredentialStore::new();
        let cancel = CancellationToken::new();

        store.create_user(new_user("a@example.com"), &cancel).await.unwrap();
        let result = store.create_user(new_user("a@example.com"), &cancel).await;
        assert!(matches!(result, Err(AppError::DuplicatedEmail)));
    }

    #[tokio::test]
    async fn test_rotate_only_once() {
        let store = MemoryCredentialStore::new();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        let user = store.create_user(new_user("b@example.com"), &cancel).await.unwrap();
        let family = Uuid::new_v4();

        store
            .insert_refresh_token(&token(user.id, family, "h1", now), &cancel)
            .await
            .unwrap();

        let first = token(user.id, family, "h2", now);
        assert!(store.rotate_refresh_token("h1", &first, now, &cancel).await.unwrap());

        let second = token(user.id, family, "h3", now);
        assert!(!store.rotate_refresh_token("h1", &second, now, &cancel).await.unwrap());
        assert!(store.find_refresh_token("h3", &cancel).await.unwrap().is_none());

        let old = store.find_refresh_token("h1", &cancel).await.unwrap().unwrap();
        assert_eq!(old.replaced_by, Some(first.id));
    }

    #[tokio::test]
    async fn test_lockout_after_max_failures() {
        let store = MemoryCredentialStore::new();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        let user = store.create_user(new_user("c@example.com"), &cancel).await.unwrap();
        let policy = LockoutPolicy {
            max_failed_logins: 3,
            lockout: Duration::minutes(10),
        };

        assert!(!store.record_failed_login(user.id, policy, now, &cancel).await.unwrap());
        assert!(!store.record_failed_login(user.id, policy, now, &cancel).await.unwrap());
        assert!(store.record_failed_login(user.id, policy, now, &cancel).await.unwrap());

        let account = store.account(user.id).await.unwrap();
        assert!(account.credentials.is_locked_out(now));
        assert_eq!(account.credentials.failed_login_count, 0);
    }

    #[tokio::test]
    async fn test_cancelled_operation_does_nothing() {
        let store = MemoryCredentialStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store.create_user(new_user("d@example.com"), &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(!store
            .email_exists("d@example.com", &CancellationToken::new())
            .await
            .unwrap());
    }
}
