//! Postgres credential store.
//!
//! Account tokens live in their own `account_tokens` table keyed by digest,
//! with a unique `(user_id, purpose)` pair so a new token replaces the old
//! one. Consumption is a conditional `DELETE … RETURNING` followed by the
//! account mutation in the same transaction; a concurrent second attempt
//! finds no row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{CredentialStore, StoreError, StoreResult};
use crate::models::auth::{AccountToken, NewUser, RefreshTokenRecord, TokenPurpose, User};
use crate::uuid::uuidv7;

const USER_COLUMNS: &str = "id, uuid, username, email, password_hash, scopes, \
     verified_contact_methods, provider";

type UserRow = (
    i64,
    Uuid,
    String,
    String,
    String,
    Vec<String>,
    Vec<String>,
    Option<String>,
);

fn user_from_row(row: UserRow) -> User {
    let (id, uuid, username, email, password_hash, scopes, verified_contact_methods, provider) =
        row;
    User {
        id,
        uuid,
        username,
        email,
        password_hash,
        scopes,
        verified_contact_methods,
        provider,
    }
}

/// [`CredentialStore`] backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_user_where(&self, column: &str, value: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_id(&self, user_id: i64) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.find_user_where("username", username).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn insert_user(&self, user: &NewUser) -> StoreResult<User> {
        let sql = format!(
            "INSERT INTO users (username, email, password_hash, scopes, provider) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.scopes)
            .bind(&user.provider)
            .fetch_one(&self.pool)
            .await?;
        Ok(user_from_row(row))
    }

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
                .bind(user_id)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn set_scopes(&self, user_id: i64, scopes: &[String]) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET scopes = $2, updated_at = now() WHERE id = $1")
            .bind(user_id)
            .bind(scopes)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn insert_refresh_token(
        &self,
        token_hash: &str,
        user_id: i64,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<RefreshTokenRecord> {
        let id = uuidv7();
        sqlx::query(
            "INSERT INTO refresh_tokens (id, token_hash, user_id, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(token_hash)
        .bind(user_id)
        .bind(created_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(RefreshTokenRecord {
            id,
            user_id,
            created_at,
            expires_at,
        })
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, (Uuid, i64, DateTime<Utc>, Option<DateTime<Utc>>)>(
            "SELECT id, user_id, created_at, expires_at \
             FROM refresh_tokens \
             WHERE token_hash = $1 \
               AND user_id = $2 \
               AND (expires_at IS NULL OR expires_at > $3)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, user_id, created_at, expires_at)| RefreshTokenRecord {
            id,
            user_id,
            created_at,
            expires_at,
        }))
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        user_id: i64,
        new_hash: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query_scalar::<_, Uuid>(
            "DELETE FROM refresh_tokens \
             WHERE token_hash = $1 \
               AND user_id = $2 \
               AND (expires_at IS NULL OR expires_at > $3) \
             RETURNING id",
        )
        .bind(old_hash)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        if removed.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        // A unique violation here drops `tx`, which rolls back the delete.
        let id = uuidv7();
        sqlx::query(
            "INSERT INTO refresh_tokens (id, token_hash, user_id, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(new_hash)
        .bind(user_id)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(RefreshTokenRecord {
            id,
            user_id,
            created_at: now,
            expires_at,
        }))
    }

    async fn put_account_token(
        &self,
        token_hash: &str,
        user_id: i64,
        purpose: TokenPurpose,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO account_tokens (token_hash, user_id, purpose, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, purpose) DO UPDATE \
             SET token_hash = EXCLUDED.token_hash, \
                 expires_at = EXCLUDED.expires_at, \
                 created_at = now()",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_account_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AccountToken>> {
        let row = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "SELECT user_id, expires_at FROM account_tokens \
             WHERE token_hash = $1 AND purpose = $2 AND expires_at > $3",
        )
        .bind(token_hash)
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, expires_at)| AccountToken {
            user_id,
            purpose,
            expires_at,
        }))
    }

    async fn has_account_token(&self, user_id: i64, purpose: TokenPurpose) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM account_tokens WHERE user_id = $1 AND purpose = $2)",
        )
        .bind(user_id)
        .bind(purpose.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        new_password_hash: &str,
    ) -> StoreResult<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let Some(user_id) = consume_account_token(&mut tx, token_hash, TokenPurpose::Reset, now)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(user_id)
            .bind(new_password_hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(user_id))
    }

    async fn consume_verify_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let Some(user_id) = consume_account_token(&mut tx, token_hash, TokenPurpose::Verify, now)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE users \
             SET verified_contact_methods = array_append(verified_contact_methods, email), \
                 updated_at = now() \
             WHERE id = $1 AND NOT (email = ANY(verified_contact_methods))",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(user_id))
    }
}

/// Delete a live token inside `tx`, returning its owner.
async fn consume_account_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_hash: &str,
    purpose: TokenPurpose,
    now: DateTime<Utc>,
) -> StoreResult<Option<i64>> {
    let user_id = sqlx::query_scalar::<_, i64>(
        "DELETE FROM account_tokens \
         WHERE token_hash = $1 AND purpose = $2 AND expires_at > $3 \
         RETURNING user_id",
    )
    .bind(token_hash)
    .bind(purpose.as_str())
    .bind(now)
    .fetch_optional(&mut **tx)
    .await?;
    if user_id.is_none() {
        debug!(%purpose, "no live account token matched");
    }
    Ok(user_id)
}
