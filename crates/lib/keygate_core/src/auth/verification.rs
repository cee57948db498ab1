//! Password-reset and contact-verification tokens.
//!
//! Each user has one reset slot and one verify slot. Issuing a token replaces
//! whatever the slot held; redeeming one is a single atomic consume in the
//! store, so a token redeems at most once even under concurrent requests.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use super::password::SecretHasher;
use super::tokens::{MAX_TOKEN_ATTEMPTS, expiry_after, generate_token, hash_token, presented};
use super::{AuthError, AuthResult};
use crate::clock::Clock;
use crate::models::auth::{TokenPurpose, User};
use crate::store::{CredentialStore, StoreError};

/// Verification state of a user's current email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Unverified,
    /// A verification token has been issued and not yet redeemed. Expiry of
    /// the token does not leave this state; only redemption does.
    PendingVerification,
    Verified,
}

pub struct VerificationManager {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn SecretHasher>,
    clock: Arc<dyn Clock>,
}

impl VerificationManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn SecretHasher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hasher,
            clock,
        }
    }

    /// Issue a reset token for `user`, invalidating any earlier one.
    pub async fn create_reset_token(&self, user: &User, ttl: Duration) -> AuthResult<String> {
        self.issue(user, TokenPurpose::Reset, ttl).await
    }

    /// Issue a verification token for `user`, invalidating any earlier one.
    pub async fn create_verify_token(&self, user: &User, ttl: Duration) -> AuthResult<String> {
        self.issue(user, TokenPurpose::Verify, ttl).await
    }

    async fn issue(&self, user: &User, purpose: TokenPurpose, ttl: Duration) -> AuthResult<String> {
        let expires_at = expiry_after(self.clock.now(), ttl)?;
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = generate_token();
            match self
                .store
                .put_account_token(&hash_token(&token), user.id, purpose, expires_at)
                .await
            {
                Ok(()) => {
                    debug!(user_id = user.id, %purpose, %expires_at, "issued account token");
                    return Ok(token);
                }
                Err(StoreError::Duplicate(_)) => {
                    warn!(user_id = user.id, %purpose, attempt, "account token collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::TokenGenerationFailed(MAX_TOKEN_ATTEMPTS))
    }

    /// Consume a live reset token and set the owner's password.
    ///
    /// `new_password` is hashed before the consume so the token is cleared and
    /// the hash written in the same store operation.
    pub async fn redeem_reset_token(&self, token: &str, new_password: &str) -> AuthResult<i64> {
        let token = presented(token).ok_or(AuthError::InvalidTokenInput)?;
        let new_hash = self.hasher.hash(new_password)?;
        let user_id = self
            .store
            .consume_reset_token(&hash_token(token), self.clock.now(), &new_hash)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        info!(user_id, "password reset redeemed");
        Ok(user_id)
    }

    /// Consume a live verification token and mark the owner's email verified.
    pub async fn basic_redeem_verify_token(&self, token: &str) -> AuthResult<i64> {
        let token = presented(token).ok_or(AuthError::InvalidTokenInput)?;
        let user_id = self
            .store
            .consume_verify_token(&hash_token(token), self.clock.now())
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        info!(user_id, "contact verified");
        Ok(user_id)
    }

    /// Like [`Self::basic_redeem_verify_token`], but the owner's password must
    /// match first. A wrong password leaves the token in place.
    pub async fn secure_redeem_verify_token(&self, token: &str, password: &str) -> AuthResult<i64> {
        let token = presented(token).ok_or(AuthError::InvalidTokenInput)?;
        let token_hash = hash_token(token);

        let Some(stored) = self
            .store
            .find_account_token(&token_hash, TokenPurpose::Verify, self.clock.now())
            .await?
        else {
            return Err(AuthError::InvalidOrExpiredToken);
        };
        let user = self
            .store
            .find_user_by_id(stored.user_id)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        if user.password_hash.is_empty() || !self.hasher.verify(password, &user.password_hash)? {
            debug!(user_id = user.id, "secure verification with wrong password");
            return Err(AuthError::IncorrectPassword);
        }

        // Re-check liveness at consume time; the token may have expired or
        // been redeemed while the password was being checked.
        let user_id = self
            .store
            .consume_verify_token(&token_hash, self.clock.now())
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        info!(user_id, "contact verified (secure)");
        Ok(user_id)
    }

    pub fn is_verified(&self, user: &User) -> bool {
        user.is_verified()
    }

    pub async fn verification_state(&self, user: &User) -> AuthResult<VerificationState> {
        if user.is_verified() {
            return Ok(VerificationState::Verified);
        }
        let pending = self
            .store
            .has_account_token(user.id, TokenPurpose::Verify)
            .await?;
        Ok(if pending {
            VerificationState::PendingVerification
        } else {
            VerificationState::Unverified
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::BcryptHasher;
    use crate::clock::ManualClock;
    use crate::models::auth::NewUser;
    use crate::store::MemoryCredentialStore;

    struct Fixture {
        manager: VerificationManager,
        store: Arc<MemoryCredentialStore>,
        clock: Arc<ManualClock>,
        hasher: Arc<BcryptHasher>,
        user: User,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryCredentialStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let hasher = Arc::new(BcryptHasher::new(4));
        let user = store
            .insert_user(&NewUser {
                username: "alice".into(),
                email: "alice@x.com".into(),
                password_hash: hasher.hash("secret123").unwrap(),
                scopes: vec![],
                provider: None,
            })
            .await
            .unwrap();
        let manager = VerificationManager::new(store.clone(), hasher.clone(), clock.clone());
        Fixture {
            manager,
            store,
            clock,
            hasher,
            user,
        }
    }

    async fn reload(f: &Fixture) -> User {
        f.store.find_user_by_id(f.user.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn reset_token_redeems_once() {
        let f = fixture().await;
        let token = f
            .manager
            .create_reset_token(&f.user, Duration::hours(1))
            .await
            .unwrap();

        f.manager.redeem_reset_token(&token, "newpass99").await.unwrap();
        let user = reload(&f).await;
        assert!(f.hasher.verify("newpass99", &user.password_hash).unwrap());

        let err = f
            .manager
            .redeem_reset_token(&token, "another99")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
        assert_eq!(f.store.account_token_count(), 0);
    }

    #[tokio::test]
    async fn reissue_invalidates_previous_token() {
        let f = fixture().await;
        let first = f
            .manager
            .create_reset_token(&f.user, Duration::hours(1))
            .await
            .unwrap();
        let second = f
            .manager
            .create_reset_token(&f.user, Duration::hours(1))
            .await
            .unwrap();

        assert!(matches!(
            f.manager.redeem_reset_token(&first, "newpass99").await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
        assert!(f.manager.redeem_reset_token(&second, "newpass99").await.is_ok());
    }

    #[tokio::test]
    async fn expired_tokens_fail() {
        let f = fixture().await;
        let reset = f
            .manager
            .create_reset_token(&f.user, Duration::seconds(60))
            .await
            .unwrap();
        let verify = f
            .manager
            .create_verify_token(&f.user, Duration::seconds(60))
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(60));
        assert!(matches!(
            f.manager.redeem_reset_token(&reset, "newpass99").await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
        assert!(matches!(
            f.manager.basic_redeem_verify_token(&verify).await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
    }

    #[tokio::test]
    async fn reset_and_verify_slots_are_separate() {
        let f = fixture().await;
        let reset = f
            .manager
            .create_reset_token(&f.user, Duration::hours(1))
            .await
            .unwrap();
        let verify = f
            .manager
            .create_verify_token(&f.user, Duration::hours(1))
            .await
            .unwrap();

        assert!(matches!(
            f.manager.basic_redeem_verify_token(&reset).await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
        assert!(matches!(
            f.manager.redeem_reset_token(&verify, "newpass99").await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
        assert_eq!(f.store.account_token_count(), 2);
    }

    #[tokio::test]
    async fn state_machine_moves_forward() {
        let f = fixture().await;
        assert_eq!(
            f.manager.verification_state(&f.user).await.unwrap(),
            VerificationState::Unverified
        );

        let token = f
            .manager
            .create_verify_token(&f.user, Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(
            f.manager.verification_state(&f.user).await.unwrap(),
            VerificationState::PendingVerification
        );

        f.manager.basic_redeem_verify_token(&token).await.unwrap();
        let user = reload(&f).await;
        assert!(f.manager.is_verified(&user));
        assert_eq!(
            f.manager.verification_state(&user).await.unwrap(),
            VerificationState::Verified
        );
    }

    #[tokio::test]
    async fn pending_survives_token_expiry() {
        let f = fixture().await;
        let expired = f
            .manager
            .create_verify_token(&f.user, Duration::seconds(10))
            .await
            .unwrap();
        f.clock.advance(Duration::days(2));
        assert_eq!(
            f.manager.verification_state(&f.user).await.unwrap(),
            VerificationState::PendingVerification
        );
        assert!(matches!(
            f.manager.basic_redeem_verify_token(&expired).await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
        assert_eq!(
            f.manager.verification_state(&f.user).await.unwrap(),
            VerificationState::PendingVerification
        );

        let fresh = f
            .manager
            .create_verify_token(&f.user, Duration::hours(24))
            .await
            .unwrap();
        f.manager.basic_redeem_verify_token(&fresh).await.unwrap();
        assert_eq!(
            f.manager.verification_state(&reload(&f).await).await.unwrap(),
            VerificationState::Verified
        );
    }

    #[tokio::test]
    async fn secure_redeem_keeps_token_on_wrong_password() {
        let f = fixture().await;
        let token = f
            .manager
            .create_verify_token(&f.user, Duration::hours(1))
            .await
            .unwrap();

        assert!(matches!(
            f.manager.secure_redeem_verify_token(&token, "wrong").await,
            Err(AuthError::IncorrectPassword)
        ));
        assert!(!reload(&f).await.is_verified());

        f.manager
            .secure_redeem_verify_token(&token, "secret123")
            .await
            .unwrap();
        assert!(reload(&f).await.is_verified());
    }

    #[tokio::test]
    async fn secure_redeem_after_expiry_ignores_password() {
        let f = fixture().await;
        let token = f
            .manager
            .create_verify_token(&f.user, Duration::seconds(30))
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(31));

        for password in ["wrong", "secret123"] {
            assert!(matches!(
                f.manager.secure_redeem_verify_token(&token, password).await,
                Err(AuthError::InvalidOrExpiredToken)
            ));
        }
    }

    #[tokio::test]
    async fn blank_token_is_rejected_before_lookup() {
        let f = fixture().await;
        assert!(matches!(
            f.manager.basic_redeem_verify_token("").await,
            Err(AuthError::InvalidTokenInput)
        ));
        assert!(matches!(
            f.manager.redeem_reset_token(" \t", "newpass99").await,
            Err(AuthError::InvalidTokenInput)
        ));
    }

    #[tokio::test]
    async fn concurrent_reset_redemptions_have_one_winner() {
        let f = fixture().await;
        let token = f
            .manager
            .create_reset_token(&f.user, Duration::hours(1))
            .await
            .unwrap();
        let manager = Arc::new(f.manager);

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = manager.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .redeem_reset_token(&token, &format!("newpass{i:02}"))
                    .await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AuthError::InvalidOrExpiredToken) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
    }
}
