//! Deployment configuration for the auth core.
//!
//! Built once at startup and handed to [`crate::auth::AuthCore::new`]; nothing
//! in the core reads process state after that.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use thiserror::Error;
use tracing::info;

/// Default session token lifetime: 1 hour.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

/// Default password-reset token lifetime: 1 hour.
pub const DEFAULT_RESET_TTL_SECS: i64 = 3600;

/// Default contact-verification token lifetime: 24 hours.
pub const DEFAULT_VERIFY_TTL_SECS: i64 = 24 * 3600;

/// Minimum accepted length for a new password.
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;

/// Longest accepted token or session lifetime: 10 years.
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 3600;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Whether login is gated on a verified contact address, and how the
/// verification token is redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationMode {
    /// Login is not gated.
    #[default]
    None,
    /// Login requires a verified email; redemption needs only the token.
    Basic,
    /// Login requires a verified email; redemption needs the token and the
    /// account password.
    Secure,
}

impl VerificationMode {
    /// True when login and password reset require a verified email.
    pub fn is_required(self) -> bool {
        !matches!(self, VerificationMode::None)
    }
}

impl FromStr for VerificationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "off" => Ok(VerificationMode::None),
            "basic" => Ok(VerificationMode::Basic),
            "secure" => Ok(VerificationMode::Secure),
            other => Err(ConfigError::InvalidValue {
                key: "KEYGATE_VERIFICATION",
                value: other.to_string(),
            }),
        }
    }
}

/// Refresh-token issuance policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTokenPolicy {
    /// Issue refresh tokens on login and accept them on refresh/reject.
    pub enabled: bool,
    /// Replace the presented token with a new one on every redemption.
    pub rotate_on_use: bool,
    /// Absolute lifetime. `None` keeps a token valid until it is revoked.
    pub ttl: Option<Duration>,
}

impl Default for RefreshTokenPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            rotate_on_use: false,
            ttl: None,
        }
    }
}

/// Immutable auth configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Session token signing secret (HS256).
    pub jwt_secret: String,
    /// Declared session token lifetime, returned to clients as `ttl`.
    pub session_ttl: Duration,
    /// Lifetime of a password-reset token.
    pub reset_token_ttl: Duration,
    /// Lifetime of a contact-verification token.
    pub verify_token_ttl: Duration,
    /// Account verification gate.
    pub verification: VerificationMode,
    /// Refresh-token policy.
    pub refresh_tokens: RefreshTokenPolicy,
    /// Minimum length for new passwords.
    pub min_password_length: usize,
}

impl AuthConfig {
    /// Defaults around an explicit signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            reset_token_ttl: Duration::seconds(DEFAULT_RESET_TTL_SECS),
            verify_token_ttl: Duration::seconds(DEFAULT_VERIFY_TTL_SECS),
            verification: VerificationMode::None,
            refresh_tokens: RefreshTokenPolicy::default(),
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
        }
    }

    pub fn with_verification(mut self, mode: VerificationMode) -> Self {
        self.verification = mode;
        self
    }

    pub fn with_refresh_tokens(mut self, policy: RefreshTokenPolicy) -> Self {
        self.refresh_tokens = policy;
        self
    }

    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                      | Default                          |
    /// |-------------------------------|----------------------------------|
    /// | `JWT_SECRET` / `AUTH_SECRET`  | generated & persisted to file    |
    /// | `KEYGATE_VERIFICATION`        | `none` (`basic`, `secure`)       |
    /// | `KEYGATE_REFRESH_TOKENS`      | `true`                           |
    /// | `KEYGATE_REFRESH_ROTATION`    | `false`                          |
    /// | `KEYGATE_REFRESH_TTL_SECS`    | unset (no expiry)                |
    /// | `KEYGATE_SESSION_TTL_SECS`    | `3600`                           |
    /// | `KEYGATE_RESET_TTL_SECS`      | `3600`                           |
    /// | `KEYGATE_VERIFY_TTL_SECS`     | `86400`                          |
    /// | `KEYGATE_MIN_PASSWORD_LENGTH` | `8`                              |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), resolve_jwt_secret)
    }

    /// Builds the configuration from an arbitrary key lookup.
    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        secret: impl FnOnce() -> String,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(secret());

        if let Some(mode) = lookup("KEYGATE_VERIFICATION") {
            config.verification = mode.parse()?;
        }
        if let Some(v) = lookup("KEYGATE_REFRESH_TOKENS") {
            config.refresh_tokens.enabled = parse_bool("KEYGATE_REFRESH_TOKENS", &v)?;
        }
        if let Some(v) = lookup("KEYGATE_REFRESH_ROTATION") {
            config.refresh_tokens.rotate_on_use = parse_bool("KEYGATE_REFRESH_ROTATION", &v)?;
        }
        if let Some(v) = lookup("KEYGATE_REFRESH_TTL_SECS") {
            config.refresh_tokens.ttl = Some(parse_secs("KEYGATE_REFRESH_TTL_SECS", &v)?);
        }
        if let Some(v) = lookup("KEYGATE_SESSION_TTL_SECS") {
            config.session_ttl = parse_secs("KEYGATE_SESSION_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("KEYGATE_RESET_TTL_SECS") {
            config.reset_token_ttl = parse_secs("KEYGATE_RESET_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("KEYGATE_VERIFY_TTL_SECS") {
            config.verify_token_ttl = parse_secs("KEYGATE_VERIFY_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("KEYGATE_MIN_PASSWORD_LENGTH") {
            config.min_password_length =
                v.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "KEYGATE_MIN_PASSWORD_LENGTH",
                        value: v.clone(),
                    })?;
        }

        Ok(config)
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("session_ttl", &self.session_ttl)
            .field("reset_token_ttl", &self.reset_token_ttl)
            .field("verify_token_ttl", &self.verify_token_ttl)
            .field("verification", &self.verification)
            .field("refresh_tokens", &self.refresh_tokens)
            .field("min_password_length", &self.min_password_length)
            .finish()
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|secs| (1..=MAX_TTL_SECS).contains(secs))
        .and_then(Duration::try_seconds)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new JWT secret");
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keygate")
        .join("jwt-secret")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = AuthConfig::from_lookup(lookup_from(&[]), || "s".into()).unwrap();
        assert_eq!(config.verification, VerificationMode::None);
        assert!(config.refresh_tokens.enabled);
        assert!(!config.refresh_tokens.rotate_on_use);
        assert!(config.refresh_tokens.ttl.is_none());
        assert_eq!(config.session_ttl.num_seconds(), DEFAULT_SESSION_TTL_SECS);
        assert_eq!(config.reset_token_ttl.num_seconds(), 3600);
        assert_eq!(config.min_password_length, 8);
    }

    #[test]
    fn reads_overrides() {
        let config = AuthConfig::from_lookup(
            lookup_from(&[
                ("KEYGATE_VERIFICATION", "Secure"),
                ("KEYGATE_REFRESH_TOKENS", "off"),
                ("KEYGATE_REFRESH_ROTATION", "1"),
                ("KEYGATE_REFRESH_TTL_SECS", "600"),
                ("KEYGATE_SESSION_TTL_SECS", "900"),
            ]),
            || "s".into(),
        )
        .unwrap();
        assert_eq!(config.verification, VerificationMode::Secure);
        assert!(!config.refresh_tokens.enabled);
        assert!(config.refresh_tokens.rotate_on_use);
        assert_eq!(config.refresh_tokens.ttl, Some(Duration::seconds(600)));
        assert_eq!(config.session_ttl.num_seconds(), 900);
    }

    #[test]
    fn rejects_bad_values() {
        let err = AuthConfig::from_lookup(
            lookup_from(&[("KEYGATE_VERIFICATION", "sometimes")]),
            || "s".into(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "KEYGATE_VERIFICATION",
                ..
            }
        ));

        assert!(
            AuthConfig::from_lookup(lookup_from(&[("KEYGATE_RESET_TTL_SECS", "-5")]), || {
                "s".into()
            })
            .is_err()
        );

        for huge in ["9223372036854775807", "8200000000000", "315360001"] {
            let err = AuthConfig::from_lookup(lookup_from(&[("KEYGATE_VERIFY_TTL_SECS", huge)]), || {
                "s".into()
            })
            .unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue {
                    key: "KEYGATE_VERIFY_TTL_SECS",
                    ..
                }
            ));
        }
    }

    #[test]
    fn accepts_the_longest_ttl() {
        let max = MAX_TTL_SECS.to_string();
        let config = AuthConfig::from_lookup(
            lookup_from(&[("KEYGATE_REFRESH_TTL_SECS", max.as_str())]),
            || "s".into(),
        )
        .unwrap();
        assert_eq!(config.refresh_tokens.ttl, Some(Duration::seconds(MAX_TTL_SECS)));
    }

    #[test]
    fn debug_redacts_secret() {
        let config = AuthConfig::new("super-secret-value");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-value"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn verification_mode_gate() {
        assert!(!VerificationMode::None.is_required());
        assert!(VerificationMode::Basic.is_required());
        assert!(VerificationMode::Secure.is_required());
    }
}
