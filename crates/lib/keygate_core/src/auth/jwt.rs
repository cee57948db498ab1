//! Session token signing and verification (JWT, HS256).

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use super::{AuthError, AuthResult};
use crate::models::auth::{TokenClaims, User};

/// Signs and verifies session tokens with a process-wide secret.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Declared session lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Declared session lifetime in whole seconds, as surfaced to clients.
    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Build claims from the user's current state. Login and refresh share
    /// this so scopes and email are always re-read, never cached.
    pub fn claims_for(&self, user: &User, issued_at: DateTime<Utc>) -> TokenClaims {
        TokenClaims {
            sub: user.id.to_string(),
            uuid: user.uuid,
            username: user.username.clone(),
            email: user.email.clone(),
            scopes: user.scopes.clone(),
            verified: user.verified_contact_methods.clone(),
            exp: (issued_at + self.ttl).timestamp(),
            iat: issued_at.timestamp(),
        }
    }

    /// Sign claims into a token string.
    pub fn sign(&self, claims: &TokenClaims) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Sign a session token for `user` issued at `issued_at`.
    pub fn sign_for(&self, user: &User, issued_at: DateTime<Utc>) -> AuthResult<String> {
        self.sign(&self.claims_for(user, issued_at))
    }

    /// Verify a session token, returning the claims on success.
    ///
    /// [`AuthError::ExpiredToken`] and [`AuthError::InvalidToken`] are kept
    /// apart for diagnostics only.
    pub fn verify(&self, token: &str) -> AuthResult<TokenClaims> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                other => {
                    debug!(reason = ?other, "session token rejected");
                    AuthError::InvalidToken
                }
            })
    }
}
