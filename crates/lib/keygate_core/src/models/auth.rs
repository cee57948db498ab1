//! Authentication domain models.
//!
//! Internal records (`User`, `RefreshTokenRecord`, `AccountToken`) and the
//! serialisable payloads that leave the core (`TokenClaims`, responses).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Internal id, never reused.
    pub id: i64,
    /// Public identifier, safe to expose.
    pub uuid: Uuid,
    pub username: String,
    pub email: String,
    /// Opaque hasher output (salt embedded). Empty for federated accounts.
    pub password_hash: String,
    pub scopes: Vec<String>,
    /// Addresses confirmed through a verification token redemption.
    pub verified_contact_methods: Vec<String>,
    /// Identity provider tag for federated accounts.
    pub provider: Option<String>,
}

impl User {
    /// True when the account's email is among its verified contact methods.
    pub fn is_verified(&self) -> bool {
        self.verified_contact_methods
            .iter()
            .any(|addr| addr == &self.email)
    }
}

/// Fields required to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub scopes: Vec<String>,
    pub provider: Option<String>,
}

/// Refresh token record stored in the database. The token value itself is
/// only ever held as a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| now < exp)
    }
}

/// Which slot a single-use account token occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    Reset,
    Verify,
}

impl TokenPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::Reset => "reset",
            TokenPurpose::Verify => "verify",
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored single-use account token (reset or verify).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountToken {
    pub user_id: i64,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
}

impl AccountToken {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// JWT claims embedded in session tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: internal user id (standard JWT `sub` claim).
    pub sub: String,
    /// Public user id.
    pub uuid: Uuid,
    pub username: String,
    pub email: String,
    pub scopes: Vec<String>,
    /// Verified contact methods at issue time.
    pub verified: Vec<String>,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

impl TokenClaims {
    /// Internal user id carried in `sub`, if it parses.
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub uuid: Uuid,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Session token lifetime in seconds.
    pub ttl: i64,
}

/// Result of a successful refresh-token submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: String,
    pub uuid: Uuid,
    pub username: String,
    /// Replacement refresh token; present only when rotation is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub ttl: i64,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn user(email: &str, verified: &[&str]) -> User {
        User {
            id: 1,
            uuid: Uuid::nil(),
            username: "alice".into(),
            email: email.into(),
            password_hash: String::new(),
            scopes: vec![],
            verified_contact_methods: verified.iter().map(|s| s.to_string()).collect(),
            provider: None,
        }
    }

    #[test]
    fn verified_requires_current_email() {
        assert!(!user("a@x.com", &[]).is_verified());
        assert!(!user("a@x.com", &["old@x.com"]).is_verified());
        assert!(user("a@x.com", &["old@x.com", "a@x.com"]).is_verified());
    }

    #[test]
    fn account_token_expires_at_boundary() {
        let now = Utc::now();
        let token = AccountToken {
            user_id: 1,
            purpose: TokenPurpose::Reset,
            expires_at: now,
        };
        assert!(!token.is_live(now));
        assert!(token.is_live(now - Duration::seconds(1)));
    }

    #[test]
    fn refresh_record_without_expiry_is_live() {
        let record = RefreshTokenRecord {
            id: Uuid::nil(),
            user_id: 1,
            created_at: Utc::now(),
            expires_at: None,
        };
        assert!(record.is_live(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn login_response_omits_missing_refresh_token() {
        let resp = LoginResponse {
            token: "t".into(),
            uuid: Uuid::nil(),
            username: "alice".into(),
            refresh_token: None,
            ttl: 3600,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("refreshToken").is_none());
        assert_eq!(json["ttl"], 3600);
    }
}
