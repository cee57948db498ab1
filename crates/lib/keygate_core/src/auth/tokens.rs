//! Opaque token generation and digesting.
//!
//! Refresh, reset and verification tokens are random alphanumeric strings.
//! Only their SHA-256 digest is persisted.

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};

use super::{AuthError, AuthResult};

/// Length of generated opaque tokens.
pub const TOKEN_LENGTH: usize = 64;

/// Attempts at generating a token that does not collide with a stored one.
pub const MAX_TOKEN_ATTEMPTS: u32 = 3;

/// Generate a random token (64 alphanumeric chars).
pub fn generate_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a token for storage.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Trim a presented token; `None` if nothing is left.
pub(crate) fn presented(token: &str) -> Option<&str> {
    let trimmed = token.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// `now + ttl`, or an internal error if that falls outside the representable
/// date range.
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> AuthResult<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Internal(format!("token lifetime {ttl} overflows")))
}

/// Build a link by appending the token as the last path segment.
pub fn build_link(link_base: &str, token: &str) -> String {
    let base = link_base.trim_end_matches('/');
    format!("{base}/{token}")
}
