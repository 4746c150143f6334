//! Postgres credential store

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{CredentialRecord, NewUser, RefreshToken, User, UserAccount};
use crate::error::{AppError, AppResult};
use crate::store::{cancellable, CredentialStore, LockoutPolicy};

const USER_COLUMNS: &str = r#"
    id, email, full_name, password_hash, is_active, is_approved, email_confirmed,
    failed_login_count, locked_until, roles, created_at
"#;

const TOKEN_COLUMNS: &str = r#"
    id, user_id, family_id, token_hash, created_at, expires_at, revoked_at, replaced_by
"#;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    full_name: String,
    password_hash: String,
    is_active: bool,
    is_approved: bool,
    email_confirmed: bool,
    failed_login_count: i32,
    locked_until: Option<DateTime<Utc>>,
    roles: Vec<String>,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_account(self) -> UserAccount {
        UserAccount {
            credentials: CredentialRecord {
                password_hash: self.password_hash,
                is_approved: self.is_approved,
                email_confirmed: self.email_confirmed,
                failed_login_count: self.failed_login_count,
                locked_until: self.locked_until,
            },
            user: User {
                id: self.id,
                email: self.email,
                full_name: self.full_name,
                is_active: self.is_active,
                roles: self.roles.into_iter().collect::<BTreeSet<_>>(),
                created_at: self.created_at,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    user_id: Uuid,
    family_id: Uuid,
    token_hash: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    replaced_by: Option<Uuid>,
}

impl From<RefreshTokenRow> for RefreshToken {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            family_id: row.family_id,
            token_hash: row.token_hash,
            created_at: row.created_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            replaced_by: row.replaced_by,
        }
    }
}

/// Credential store backed by the `users` and `refresh_tokens` tables
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_account(&self, email: &str) -> AppResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_account))
    }

    async fn fetch_account_by_id(&self, user_id: Uuid) -> AppResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_account))
    }

    async fn insert_user(&self, user: NewUser) -> AppResult<User> {
        let roles: Vec<String> = user.roles.iter().cloned().collect();

        let result = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (
                id, email, full_name, password_hash, is_active, is_approved,
                email_confirmed, roles, created_at
            )
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(user.is_approved)
        .bind(user.email_confirmed)
        .bind(&roles)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.into_account().user),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::DuplicatedEmail)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn bump_failed_logins(
        &self,
        user_id: Uuid,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let locked_until = now + policy.lockout;

        // SET expressions see the pre-update row
        let locked: Option<bool> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET
                failed_login_count = CASE
                    WHEN failed_login_count + 1 >= $2 THEN 0
                    ELSE failed_login_count + 1
                END,
                locked_until = CASE
                    WHEN failed_login_count + 1 >= $2 THEN $3
                    ELSE locked_until
                END
            WHERE id = $1
            RETURNING COALESCE(failed_login_count = 0 AND locked_until = $3, FALSE)
            "#,
        )
        .bind(user_id)
        .bind(policy.max_failed_logins)
        .bind(locked_until)
        .fetch_optional(&self.pool)
        .await?;

        Ok(locked.unwrap_or(false))
    }

    async fn clear_failed_logins(&self, user_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_count = 0, locked_until = NULL
            WHERE id = $1 AND (failed_login_count <> 0 OR locked_until IS NOT NULL)
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_token(conn: &mut PgConnection, token: &RefreshToken) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                id, user_id, family_id, token_hash, created_at, expires_at, revoked_at, replaced_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(token.family_id)
        .bind(&token.token_hash)
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .bind(token.replaced_by)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn fetch_token(&self, token_hash: &str) -> AppResult<Option<RefreshToken>> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RefreshToken::from))
    }

    async fn rotate(
        &self,
        presented_hash: &str,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        // The replacement must exist before the old row can point at it
        Self::insert_token(&mut *tx, replacement).await?;

        // A concurrent rotation of the same token blocks on the row lock and
        // then sees revoked_at set, so it matches nothing.
        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $3, replaced_by = $4
            WHERE token_hash = $1
              AND user_id = $2
              AND revoked_at IS NULL
              AND expires_at > $3
            "#,
        )
        .bind(presented_hash)
        .bind(replacement.user_id)
        .bind(now)
        .bind(replacement.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if revoked != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_one(&self, token_hash: &str, now: DateTime<Utc>) -> AppResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked_at = $2
            WHERE token_hash = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows == 1)
    }

    async fn revoke_where(&self, column: &str, id: Uuid, now: DateTime<Utc>) -> AppResult<u64> {
        let rows = sqlx::query(&format!(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE {column} = $1 AND revoked_at IS NULL"
        ))
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_account_by_email(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<UserAccount>> {
        cancellable(cancel, self.fetch_account(email)).await
    }

    async fn find_account(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<UserAccount>> {
        cancellable(cancel, self.fetch_account_by_id(user_id)).await
    }

    async fn email_exists(&self, email: &str, cancel: &CancellationToken) -> AppResult<bool> {
        cancellable(cancel, async {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
                    .bind(email)
                    .fetch_one(&self.pool)
                    .await?;
            Ok::<_, AppError>(exists)
        })
        .await
    }

    async fn create_user(&self, user: NewUser, cancel: &CancellationToken) -> AppResult<User> {
        cancellable(cancel, self.insert_user(user)).await
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        cancellable(cancel, self.bump_failed_logins(user_id, policy, now)).await
    }

    async fn reset_failed_logins(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        cancellable(cancel, self.clear_failed_logins(user_id)).await
    }

    async fn insert_refresh_token(
        &self,
        token: &RefreshToken,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        cancellable(cancel, async {
            let mut conn = self.pool.acquire().await?;
            Self::insert_token(&mut *conn, token).await
        })
        .await
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<RefreshToken>> {
        cancellable(cancel, self.fetch_token(token_hash)).await
    }

    async fn rotate_refresh_token(
        &self,
        presented_hash: &str,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        cancellable(cancel, self.rotate(presented_hash, replacement, now)).await
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        cancellable(cancel, self.revoke_one(token_hash, now)).await
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<u64> {
        cancellable(cancel, self.revoke_where("family_id", family_id, now)).await
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<u64> {
        cancellable(cancel, self.revoke_where("user_id", user_id, now)).await
    }
}
