//! # keygate_core
//!
//! Credential, session and verification token lifecycle for Keygate.
//!
//! [`auth::AuthCore`] is the entry point. It composes a [`store::CredentialStore`],
//! an [`auth::password::SecretHasher`] and a [`notify::Notifier`] under an
//! immutable [`config::AuthConfig`].

pub mod auth;
pub mod clock;
pub mod config;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
