//! SMTP delivery via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::SmtpConfig;
use crate::error::MailError;
use crate::mail::{Mailer, OutgoingEmail};

pub struct SmtpMailer {
    from_address: String,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| MailError::SendFailed(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            from_address: config.from_address.clone(),
            transport,
        })
    }
}

/// Plain-text message with threading headers set from `email`.
pub fn build_message(from_address: &str, email: &OutgoingEmail) -> Result<Message, MailError> {
    let from = from_address.parse().map_err(|e| MailError::InvalidAddress {
        address: from_address.to_string(),
        reason: format!("{e}"),
    })?;
    let to = email.to.parse().map_err(|e| MailError::InvalidAddress {
        address: email.to.clone(),
        reason: format!("{e}"),
    })?;

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.as_str())
        .message_id(Some(format!("<{}>", email.message_id)))
        .header(ContentType::TEXT_PLAIN);
    if let Some(previous) = &email.in_reply_to {
        builder = builder
            .in_reply_to(format!("<{previous}>"))
            .references(format!("<{previous}>"));
    }

    builder
        .body(email.body.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(&self.from_address, email)?;
        let transport = self.transport.clone();

        // lettre's SmtpTransport blocks.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::SendFailed(format!("send task panicked: {e}")))?
            .map_err(|e| MailError::SendFailed(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = %email.to, message_id = %email.message_id, "Email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FROM: &str = "assistant@schedule.example";

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            to: to.into(),
            subject: "Re: Lunch".into(),
            body: "Tuesday at noon works.".into(),
            message_id: "abc@schedule.example".into(),
            in_reply_to: Some("m1@example.com".into()),
        }
    }

    #[test]
    fn builds_threaded_reply() {
        let message = build_message(FROM, &email("alice@example.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("In-Reply-To: <m1@example.com>"));
        assert!(raw.contains("<abc@schedule.example>"));
        assert!(raw.contains("Subject: Re: Lunch"));
    }

    #[test]
    fn rejects_bad_recipient() {
        let err = build_message(FROM, &email("not an address")).unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress { .. }));
    }

    #[test]
    fn rejects_bad_sender() {
        let err = build_message("nobody", &email("alice@example.com")).unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress { address, .. } if address == "nobody"));
    }
}
