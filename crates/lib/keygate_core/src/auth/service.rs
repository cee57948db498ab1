//! Authentication service: login, refresh, password and verification flows.
//!
//! [`AuthCore`] is constructed once with an immutable [`AuthConfig`] and its
//! collaborators, then shared across requests.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::jwt::TokenSigner;
use super::password::SecretHasher;
use super::refresh::RefreshTokenManager;
use super::tokens::{build_link, presented};
use super::verification::{VerificationManager, VerificationState};
use super::{AuthError, AuthResult};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthConfig, VerificationMode};
use crate::models::auth::{LoginResponse, RefreshResponse, TokenClaims, TokenPurpose, User};
use crate::notify::{Notification, Notifier};
use crate::store::{CredentialStore, StoreError};

const RESET_SUBJECT: &str = "Password reset";
const VERIFY_SUBJECT: &str = "Verify your email address";

/// Plaintext behind the hash checked when a login names no usable account.
const DUMMY_PASSWORD: &str = "keygate-dummy-password";

pub struct AuthCore {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn SecretHasher>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    signer: Arc<TokenSigner>,
    refresh: RefreshTokenManager,
    verification: VerificationManager,
    dummy_hash: OnceCell<String>,
}

impl AuthCore {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn SecretHasher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::with_clock(config, store, hasher, notifier, Arc::new(SystemClock))
    }

    /// Like [`AuthCore::new`] with an explicit clock for token expiry.
    pub fn with_clock(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn SecretHasher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let signer = Arc::new(TokenSigner::new(
            config.jwt_secret.as_bytes(),
            config.session_ttl,
        ));
        let refresh = RefreshTokenManager::new(
            store.clone(),
            signer.clone(),
            clock.clone(),
            config.refresh_tokens,
        );
        let verification = VerificationManager::new(store.clone(), hasher.clone(), clock.clone());
        Self {
            config,
            store,
            hasher,
            notifier,
            clock,
            signer,
            refresh,
            verification,
            dummy_hash: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenManager {
        &self.refresh
    }

    pub fn verification(&self) -> &VerificationManager {
        &self.verification
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Authenticate with username + password.
    ///
    /// Unknown user and wrong password fail identically, and both pay for one
    /// hash verification. The verification gate is checked only after the
    /// password matched.
    pub async fn login(&self, username: &str, password: &str) -> AuthResult<LoginResponse> {
        let user = match self.store.find_user_by_username(username).await? {
            Some(user) if !user.password_hash.is_empty() => user,
            _ => {
                self.verify_against_dummy(password).await;
                info!(username, "login failed");
                return Err(AuthError::IncorrectCredentials);
            }
        };
        if !self.hasher.verify(password, &user.password_hash)? {
            info!(username, "login failed");
            return Err(AuthError::IncorrectCredentials);
        }

        if self.config.verification.is_required() && !self.verification.is_verified(&user) {
            info!(user_id = user.id, "login blocked, account not verified");
            return Err(AuthError::AccountNotVerified);
        }

        let token = self.signer.sign_for(&user, self.clock.now())?;
        let refresh_token = if self.refresh.is_enabled() {
            Some(self.refresh.create_new_token(user.id).await?.token)
        } else {
            None
        };

        info!(user_id = user.id, "login succeeded");
        Ok(LoginResponse {
            token,
            uuid: user.uuid,
            username: user.username,
            refresh_token,
            ttl: self.signer.ttl_secs(),
        })
    }

    /// Mint a new session token from a refresh token. Claims reflect the
    /// user's current scopes and email.
    pub async fn submit_refresh_token(
        &self,
        username: &str,
        refresh_token: &str,
    ) -> AuthResult<RefreshResponse> {
        let redemption = self.refresh.redeem(username, refresh_token).await?;
        Ok(RefreshResponse {
            token: redemption.session_token,
            uuid: redemption.user.uuid,
            username: redemption.user.username,
            refresh_token: redemption.rotated,
            ttl: self.signer.ttl_secs(),
        })
    }

    /// Revoke a refresh token (logout).
    pub async fn reject_refresh_token(&self, refresh_token: &str) -> AuthResult<()> {
        self.refresh.reject(refresh_token).await
    }

    /// Verify a session token and return its claims.
    pub fn authenticate(&self, session_token: &str) -> AuthResult<TokenClaims> {
        let token = presented(session_token).ok_or(AuthError::InvalidToken)?;
        self.signer.verify(token)
    }

    // -----------------------------------------------------------------------
    // Passwords
    // -----------------------------------------------------------------------

    /// Change the password of an authenticated user.
    pub async fn update_password(
        &self,
        user_id: i64,
        old_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        self.check_password(new_password)?;

        let user = self.user_by_id(user_id).await?;
        if user.password_hash.is_empty() || !self.hasher.verify(old_password, &user.password_hash)?
        {
            info!(user_id, "password change rejected");
            return Err(AuthError::IncorrectPassword);
        }

        let new_hash = self.hasher.hash(new_password)?;
        self.store.update_password_hash(user_id, &new_hash).await?;
        info!(user_id, "password changed");
        Ok(())
    }

    /// Email a reset link. Unknown addresses are accepted without sending
    /// anything.
    pub async fn request_password_reset(&self, email: &str, link_base: &str) -> AuthResult<()> {
        let email = normalize_email(email)?;
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            debug!("password reset requested for unknown address");
            return Ok(());
        };

        if self.config.verification.is_required() && !self.verification.is_verified(&user) {
            info!(user_id = user.id, "password reset blocked, account not verified");
            return Err(AuthError::AccountNotVerified);
        }

        let token = self
            .verification
            .create_reset_token(&user, self.config.reset_token_ttl)
            .await?;
        let link = build_link(link_base, &token);
        let body = format!(
            "You have requested the reset of the password for your account\n\
             Please click on the following link, or paste into your browser:\n\
             {link}\n\n\
             If you or your admin did not request a reset, please ignore this email.\n"
        );
        self.deliver(&user, TokenPurpose::Reset, RESET_SUBJECT, body, link)
            .await
    }

    /// Set a new password with a reset token.
    pub async fn redeem_password_reset(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let token = presented(token).ok_or(AuthError::InvalidTokenInput)?;
        self.check_password(new_password)?;
        self.verification
            .redeem_reset_token(token, new_password)
            .await
            .map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    /// Email a verification link. A new request replaces any pending token.
    /// Unknown and already verified addresses are accepted as no-ops.
    pub async fn request_verification(&self, email: &str, link_base: &str) -> AuthResult<()> {
        let email = normalize_email(email)?;
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            debug!("verification requested for unknown address");
            return Ok(());
        };
        if self.verification.is_verified(&user) {
            debug!(user_id = user.id, "verification requested for verified address");
            return Ok(());
        }

        let token = self
            .verification
            .create_verify_token(&user, self.config.verify_token_ttl)
            .await?;
        let link = build_link(link_base, &token);
        let body = format!(
            "You have requested the verification of the email address for your account\n\
             Please click on the following link, or paste into your browser:\n\
             {link}\n\n\
             If you did not create an account, please ignore this email.\n"
        );
        self.deliver(&user, TokenPurpose::Verify, VERIFY_SUBJECT, body, link)
            .await
    }

    /// Redeem a verification token. In secure mode the account password is
    /// required; a missing or wrong one fails with `IncorrectPassword` and
    /// leaves the token redeemable.
    pub async fn redeem_verification(&self, token: &str, password: Option<&str>) -> AuthResult<()> {
        let redeemed = match self.config.verification {
            VerificationMode::Secure => {
                self.verification
                    .secure_redeem_verify_token(token, password.unwrap_or_default())
                    .await
            }
            VerificationMode::Basic | VerificationMode::None => {
                self.verification.basic_redeem_verify_token(token).await
            }
        };
        redeemed.map(|_| ())
    }

    pub async fn verification_state(&self, user_id: i64) -> AuthResult<VerificationState> {
        let user = self.user_by_id(user_id).await?;
        self.verification.verification_state(&user).await
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Replace a user's scopes. Existing session tokens keep their snapshot
    /// until they expire; the next refresh picks up the change.
    pub async fn set_scopes(&self, user_id: i64, scopes: &[String]) -> AuthResult<()> {
        self.store.set_scopes(user_id, scopes).await?;
        info!(user_id, ?scopes, "scopes updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn user_by_id(&self, user_id: i64) -> AuthResult<User> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")).into())
    }

    async fn verify_against_dummy(&self, password: &str) {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| async { self.hasher.hash(DUMMY_PASSWORD) })
            .await;
        match dummy {
            Ok(hash) => {
                let _ = self.hasher.verify(password, hash);
            }
            Err(e) => warn!(error = %e, "could not build dummy password hash"),
        }
    }

    fn check_password(&self, password: &str) -> AuthResult<()> {
        if password.chars().count() < self.config.min_password_length {
            return Err(AuthError::InvalidPassword(format!(
                "Password must be at least {} characters",
                self.config.min_password_length
            )));
        }
        Ok(())
    }

    async fn deliver(
        &self,
        user: &User,
        purpose: TokenPurpose,
        subject: &str,
        body: String,
        link: String,
    ) -> AuthResult<()> {
        let notification = Notification::new(&user.email, subject, body)
            .with_meta("purpose", purpose.as_str())
            .with_meta("link", link);
        self.notifier.send(&notification).await?;
        info!(user_id = user.id, %purpose, "notification sent");
        Ok(())
    }
}

/// Trim and lower-case an email address, rejecting anything that is not
/// shaped like `local@domain.tld`.
fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim().to_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(AuthError::InvalidEmail);
    };
    let valid = !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace);
    if valid { Ok(email) } else { Err(AuthError::InvalidEmail) }
}
