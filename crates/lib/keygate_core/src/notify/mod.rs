//! Outbound notification seam.
//!
//! The core hands a [`Notification`] (recipient, subject, body, metadata) to a
//! [`Notifier`] and treats any error as a delivery failure.

pub mod smtp;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use smtp::{SmtpNotifier, SmtpSettings};

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Could not build message: {0}")]
    Message(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// A message addressed to a user-controlled contact address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Structured extras (`purpose`, `link`) for notifiers that render their
    /// own templates.
    pub metadata: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Delivers notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them. Local
/// development only: the log line carries the link.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            purpose = notification.metadata.get("purpose").map(String::as_str),
            link = notification.metadata.get("link").map(String::as_str),
            "notification (not delivered)"
        );
        Ok(())
    }
}
