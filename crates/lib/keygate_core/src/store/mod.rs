//! Credential store seam.
//!
//! The core only talks to persistence through [`CredentialStore`]. Single-use
//! tokens rely on the `consume_*` operations being atomic: a conditional
//! delete that succeeds for exactly one caller, together with the account
//! mutation it unlocks.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{AccountToken, NewUser, RefreshTokenRecord, TokenPurpose, User};

pub use memory::MemoryCredentialStore;
pub use postgres::PgCredentialStore;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Duplicate value for unique field: {0}")]
    Duplicate(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Db(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if is_unique_violation(&e) {
            let constraint = match &e {
                sqlx::Error::Database(db_err) => {
                    db_err.constraint().unwrap_or("unique").to_string()
                }
                _ => "unique".to_string(),
            };
            return StoreError::Duplicate(constraint);
        }
        StoreError::Db(e)
    }
}

/// Postgres SQLSTATE for `unique_violation`.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable storage for users, refresh tokens and single-use account tokens.
///
/// Token arguments are always digests (see [`crate::auth::tokens::hash_token`]).
/// `now` is passed in so every expiry decision uses the caller's clock.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, user_id: i64) -> StoreResult<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Case-insensitive match on the stored address.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Create a user. Fails with [`StoreError::Duplicate`] on a taken
    /// username or email.
    async fn insert_user(&self, user: &NewUser) -> StoreResult<User>;

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> StoreResult<()>;

    async fn set_scopes(&self, user_id: i64, scopes: &[String]) -> StoreResult<()>;

    /// Persist a refresh token. Fails with [`StoreError::Duplicate`] if the
    /// digest already exists.
    async fn insert_refresh_token(
        &self,
        token_hash: &str,
        user_id: i64,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<RefreshTokenRecord>;

    /// Live refresh token matching both digest and owner.
    async fn find_refresh_token(
        &self,
        token_hash: &str,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Delete a refresh token by digest. Returns whether a row was removed.
    async fn delete_refresh_token(&self, token_hash: &str) -> StoreResult<bool>;

    /// Replace the live refresh token `old_hash` owned by `user_id` with
    /// `new_hash` in one step. Returns `None` if the old token is gone. On
    /// [`StoreError::Duplicate`] for `new_hash` the old token is left in place.
    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        user_id: i64,
        new_hash: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Store an account token, replacing any previous token with the same
    /// owner and purpose.
    async fn put_account_token(
        &self,
        token_hash: &str,
        user_id: i64,
        purpose: TokenPurpose,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Live account token by digest and purpose, without consuming it.
    async fn find_account_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AccountToken>>;

    /// True if the user holds a token for `purpose`, live or expired. Tokens
    /// leave the store only when consumed or replaced.
    async fn has_account_token(&self, user_id: i64, purpose: TokenPurpose) -> StoreResult<bool>;

    /// Atomically consume a live reset token and set the owner's password
    /// hash. Returns the owner id, or `None` if nothing was consumed.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        new_password_hash: &str,
    ) -> StoreResult<Option<i64>>;

    /// Atomically consume a live verify token and add the owner's email to
    /// its verified contact methods. Returns the owner id, or `None`.
    async fn consume_verify_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<i64>>;
}
