//! Authentication and token lifecycle.
//!
//! Session tokens ([`jwt`]), refresh tokens ([`refresh`]), single-use reset
//! and verification tokens ([`verification`]), and the [`AuthCore`]
//! orchestration that ties them to the credential store.

pub mod jwt;
pub mod password;
pub mod refresh;
pub mod service;
pub mod tokens;
pub mod verification;

use thiserror::Error;

use crate::notify::NotifyError;
use crate::store::StoreError;

pub use jwt::TokenSigner;
pub use password::{BcryptHasher, HashError, SecretHasher};
pub use refresh::RefreshTokenManager;
pub use service::AuthCore;
pub use verification::{VerificationManager, VerificationState};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown username or wrong password. The two are deliberately not
    /// distinguished.
    #[error("Incorrect username or password")]
    IncorrectCredentials,

    #[error("Account not verified")]
    AccountNotVerified,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    #[error("{0} is disabled")]
    FeatureDisabled(&'static str),

    #[error("Could not generate a unique token after {0} attempts")]
    TokenGenerationFailed(u32),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Delivery failed: {0}")]
    DeliveryFailed(#[from] NotifyError),

    #[error("Invalid email")]
    InvalidEmail,

    #[error("Invalid token input")]
    InvalidTokenInput,

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Secret hasher error: {0}")]
    Hasher(#[from] HashError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`AuthError`] for callers that branch on the
/// kind of failure rather than its detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IncorrectCredentials,
    AccountNotVerified,
    IncorrectPassword,
    InvalidOrExpiredToken,
    RefreshTokenNotFound,
    FeatureDisabled,
    TokenGenerationFailed,
    InvalidToken,
    ExpiredToken,
    DeliveryFailed,
    InvalidEmail,
    InvalidTokenInput,
    InvalidPassword,
    /// A collaborator (store, hasher) failed.
    DependencyFailure,
    Internal,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::IncorrectCredentials => ErrorKind::IncorrectCredentials,
            AuthError::AccountNotVerified => ErrorKind::AccountNotVerified,
            AuthError::IncorrectPassword => ErrorKind::IncorrectPassword,
            AuthError::InvalidOrExpiredToken => ErrorKind::InvalidOrExpiredToken,
            AuthError::RefreshTokenNotFound => ErrorKind::RefreshTokenNotFound,
            AuthError::FeatureDisabled(_) => ErrorKind::FeatureDisabled,
            AuthError::TokenGenerationFailed(_) => ErrorKind::TokenGenerationFailed,
            AuthError::InvalidToken => ErrorKind::InvalidToken,
            AuthError::ExpiredToken => ErrorKind::ExpiredToken,
            AuthError::DeliveryFailed(_) => ErrorKind::DeliveryFailed,
            AuthError::InvalidEmail => ErrorKind::InvalidEmail,
            AuthError::InvalidTokenInput => ErrorKind::InvalidTokenInput,
            AuthError::InvalidPassword(_) => ErrorKind::InvalidPassword,
            AuthError::Store(_) | AuthError::Hasher(_) => ErrorKind::DependencyFailure,
            AuthError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for both signed-token failures. Callers enforcing authorization
    /// treat these identically.
    pub fn is_session_rejection(&self) -> bool {
        matches!(self, AuthError::InvalidToken | AuthError::ExpiredToken)
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
