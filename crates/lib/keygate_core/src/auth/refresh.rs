//! Refresh token issuance, redemption and revocation.
//!
//! Refresh tokens are long-lived opaque strings looked up against the store.
//! By default redemption only reads: the token stays valid until it is
//! rejected. With `rotate_on_use` the presented token is swapped for a new
//! one in a single store call; the swap is the single-use gate, and a failed
//! swap leaves the presented token valid.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::jwt::TokenSigner;
use super::tokens::{MAX_TOKEN_ATTEMPTS, expiry_after, generate_token, hash_token, presented};
use super::{AuthError, AuthResult};
use crate::clock::Clock;
use crate::config::RefreshTokenPolicy;
use crate::models::auth::{RefreshTokenRecord, User};
use crate::store::{CredentialStore, StoreError};

/// A freshly issued refresh token. `token` is the only copy of the raw value.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshTokenRecord,
}

/// Outcome of a successful redemption.
#[derive(Debug, Clone)]
pub struct RefreshRedemption {
    /// The user as currently stored.
    pub user: User,
    /// Newly signed session token.
    pub session_token: String,
    /// Replacement refresh token when rotation is enabled.
    pub rotated: Option<String>,
}

pub struct RefreshTokenManager {
    store: Arc<dyn CredentialStore>,
    signer: Arc<TokenSigner>,
    clock: Arc<dyn Clock>,
    policy: RefreshTokenPolicy,
}

impl RefreshTokenManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        signer: Arc<TokenSigner>,
        clock: Arc<dyn Clock>,
        policy: RefreshTokenPolicy,
    ) -> Self {
        Self {
            store,
            signer,
            clock,
            policy,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.enabled
    }

    fn ensure_enabled(&self) -> AuthResult<()> {
        if self.policy.enabled {
            Ok(())
        } else {
            Err(AuthError::FeatureDisabled("refresh tokens"))
        }
    }

    /// Issue and persist a new refresh token for `user_id`. A digest
    /// collision retries with fresh randomness.
    pub async fn create_new_token(&self, user_id: i64) -> AuthResult<IssuedRefreshToken> {
        self.ensure_enabled()?;

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = generate_token();
            let now = self.clock.now();
            let expires_at = self.expiry(now)?;
            match self
                .store
                .insert_refresh_token(&hash_token(&token), user_id, now, expires_at)
                .await
            {
                Ok(record) => {
                    debug!(user_id, token_id = %record.id, "issued refresh token");
                    return Ok(IssuedRefreshToken { token, record });
                }
                Err(StoreError::Duplicate(_)) => {
                    warn!(user_id, attempt, "refresh token collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AuthError::TokenGenerationFailed(MAX_TOKEN_ATTEMPTS))
    }

    fn expiry(&self, now: DateTime<Utc>) -> AuthResult<Option<DateTime<Utc>>> {
        self.policy
            .ttl
            .map(|ttl| expiry_after(now, ttl))
            .transpose()
    }

    /// Swap `old_hash` for a fresh token owned by `user_id`.
    async fn rotate(&self, old_hash: &str, user_id: i64) -> AuthResult<String> {
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = generate_token();
            let now = self.clock.now();
            let expires_at = self.expiry(now)?;
            match self
                .store
                .rotate_refresh_token(old_hash, user_id, &hash_token(&token), now, expires_at)
                .await
            {
                Ok(Some(record)) => {
                    debug!(user_id, token_id = %record.id, "rotated refresh token");
                    return Ok(token);
                }
                // Lost a race with a concurrent rotation or rejection.
                Ok(None) => return Err(AuthError::RefreshTokenNotFound),
                Err(StoreError::Duplicate(_)) => {
                    warn!(user_id, attempt, "refresh token collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AuthError::TokenGenerationFailed(MAX_TOKEN_ATTEMPTS))
    }

    /// Exchange a refresh token for a new session token.
    ///
    /// The token must belong to `username`; a token presented for another
    /// user is rejected exactly like a missing one.
    pub async fn redeem(&self, username: &str, presented_token: &str) -> AuthResult<RefreshRedemption> {
        self.ensure_enabled()?;
        let token = presented(presented_token).ok_or(AuthError::InvalidTokenInput)?;

        let Some(user) = self.store.find_user_by_username(username).await? else {
            debug!(username, "refresh for unknown user");
            return Err(AuthError::RefreshTokenNotFound);
        };

        let token_hash = hash_token(token);
        let now = self.clock.now();
        if self
            .store
            .find_refresh_token(&token_hash, user.id, now)
            .await?
            .is_none()
        {
            debug!(user_id = user.id, "refresh token not found for user");
            return Err(AuthError::RefreshTokenNotFound);
        }

        let rotated = if self.policy.rotate_on_use {
            Some(self.rotate(&token_hash, user.id).await?)
        } else {
            None
        };

        let session_token = self.signer.sign_for(&user, now)?;
        info!(user_id = user.id, rotated = rotated.is_some(), "refresh token redeemed");

        Ok(RefreshRedemption {
            user,
            session_token,
            rotated,
        })
    }

    /// Revoke a refresh token by value alone.
    pub async fn reject(&self, presented_token: &str) -> AuthResult<()> {
        self.ensure_enabled()?;
        let token = presented(presented_token).ok_or(AuthError::InvalidTokenInput)?;

        if !self.store.delete_refresh_token(&hash_token(token)).await? {
            return Err(AuthError::RefreshTokenNotFound);
        }
        info!("refresh token rejected");
        Ok(())
    }
}
