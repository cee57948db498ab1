//! SMTP delivery via lettre's async tokio transport.

use std::fmt;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use super::{Notification, Notifier, NotifyError};

/// SMTP connection settings.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `From` header, e.g. `Keygate <no-reply@example.com>`.
    pub from: String,
    /// Require TLS. Disable only for local relays such as mailpit.
    pub tls: bool,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("tls", &self.tls)
            .finish()
    }
}

pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| NotifyError::Address(format!("from {}: {e}", settings.from)))?;

        let mut builder = if settings.tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| NotifyError::Transport(format!("relay {}: {e}", settings.host)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };
        builder = builder
            .port(settings.port)
            .timeout(Some(std::time::Duration::from_secs(10)));
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        debug!(host = %settings.host, port = settings.port, tls = settings.tls, "smtp notifier configured");
        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }

    fn message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let to: Mailbox = notification
            .recipient
            .parse()
            .map_err(|e| NotifyError::Address(format!("to: {e}")))?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| NotifyError::Message(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = self.message(notification)?;
        self.mailer.send(message).await.map_err(|e| {
            warn!(error = %e, "smtp delivery failed");
            NotifyError::Transport(e.to_string())
        })?;
        debug!(subject = %notification.subject, "notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "localhost".into(),
            port: 1025,
            username: None,
            password: Some("hunter2".into()),
            from: "Keygate <no-reply@example.com>".into(),
            tls: false,
        }
    }

    #[tokio::test]
    async fn builds_plain_text_message() {
        let notifier = SmtpNotifier::new(&settings()).unwrap();
        let message = notifier
            .message(&Notification::new("alice@x.com", "Hello", "Body text"))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: alice@x.com"));
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("text/plain"));
    }

    #[tokio::test]
    async fn rejects_bad_addresses() {
        assert!(matches!(
            SmtpNotifier::new(&SmtpSettings {
                from: "not an address".into(),
                ..settings()
            }),
            Err(NotifyError::Address(_))
        ));

        let notifier = SmtpNotifier::new(&settings()).unwrap();
        assert!(matches!(
            notifier.message(&Notification::new("nope", "s", "b")),
            Err(NotifyError::Address(_))
        ));
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", settings());
        assert!(!rendered.contains("hunter2"));
    }
}
