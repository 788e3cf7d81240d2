//! SMTP alert channel.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Alert, AlertError, Notifier};
use crate::config::SmtpConfig;

/// Sends alerts as plain-text mail through an SMTP relay.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, AlertError> {
        let from = parse_mailbox(&config.from)?;
        let to = parse_mailbox(&config.to)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| AlertError::Transport(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { mailer, from, to })
    }

    fn message(&self, alert: &Alert) -> Result<Message, AlertError> {
        build_message(self.from.clone(), self.to.clone(), alert)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let message = self.message(alert)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, AlertError> {
    address
        .parse()
        .map_err(|e| AlertError::Address(format!("{}: {}", address, e)))
}

fn build_message(from: Mailbox, to: Mailbox, alert: &Alert) -> Result<Message, AlertError> {
    Message::builder()
        .from(from)
        .to(to)
        .subject(alert.subject())
        .header(ContentType::TEXT_PLAIN)
        .body(alert.body())
        .map_err(|e| AlertError::Build(e.to_string()))
}
