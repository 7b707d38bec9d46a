//! SMTP email channel.

use super::{render, ChannelError, NotificationChannel};
use crate::diff::Delta;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;
use tracing::info;

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    /// Relay host name.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Sender address; falls back to `username` when empty.
    pub from_address: String,
    /// STARTTLS when true, implicit TLS otherwise.
    pub use_tls: bool,
}

/// Sends one multipart (text + HTML) message to every recipient.
pub struct EmailChannel {
    transport: SmtpTransport,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl EmailChannel {
    /// Validates addresses and prepares the SMTP transport.
    pub fn new(settings: &SmtpSettings, recipients: &[String]) -> Result<Self, ChannelError> {
        let sender = if settings.from_address.trim().is_empty() {
            settings.username.as_str()
        } else {
            settings.from_address.as_str()
        };
        let from = parse_mailbox(sender)?;
        let recipients = recipients
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<Result<Vec<_>, _>>()?;
        if recipients.is_empty() {
            return Err(ChannelError::Message("no email recipients".into()));
        }

        let builder = if settings.use_tls {
            SmtpTransport::starttls_relay(&settings.host)
        } else {
            SmtpTransport::relay(&settings.host)
        }
        .map_err(|err| ChannelError::Delivery(err.to_string()))?;
        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(30)))
            .build();

        Ok(Self {
            transport,
            from,
            recipients,
        })
    }

    fn build_message(&self, delta: &Delta) -> Result<Message, ChannelError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(render::subject(delta));
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        builder
            .multipart(MultiPart::alternative_plain_html(
                render::text_summary(delta),
                render::html_summary(delta),
            ))
            .map_err(|err| ChannelError::Message(err.to_string()))
    }
}

impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn notify(&self, delta: &Delta) -> Result<usize, ChannelError> {
        if delta.is_empty() {
            return Ok(0);
        }
        let message = self.build_message(delta)?;
        self.transport
            .send(&message)
            .map_err(|err| ChannelError::Delivery(err.to_string()))?;
        info!(recipients = self.recipients.len(), "email alert sent");
        Ok(self.recipients.len())
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, ChannelError> {
    raw.trim()
        .parse()
        .map_err(|err: lettre::address::AddressError| ChannelError::InvalidRecipient {
            recipient: raw.to_string(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            username: "bot@example.com".into(),
            password: "secret".into(),
            from_address: String::new(),
            use_tls: true,
        }
    }

    #[test]
    fn rejects_malformed_recipient() {
        let err = EmailChannel::new(&settings(), &["not an address".into()])
            .err()
            .expect("invalid recipient");
        assert!(matches!(err, ChannelError::InvalidRecipient { .. }), "{err}");
    }

    #[test]
    fn requires_a_recipient() {
        assert!(EmailChannel::new(&settings(), &[]).is_err());
    }

    #[test]
    fn sender_defaults_to_username() {
        let channel = EmailChannel::new(&settings(), &["ops@example.com".into()]).expect("channel");
        assert_eq!(channel.from.email.to_string(), "bot@example.com");
        assert_eq!(channel.name(), "email");
    }
}
