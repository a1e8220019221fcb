//! Outbound email: replies to senders, over SMTP or recorded in memory.

pub mod handler;
pub mod smtp;
pub mod templates;

pub use handler::{MailingHandler, SchedulingAgent, SlotSuggestionAgent};
pub use smtp::SmtpMailer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::MailError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Message-ID to stamp on the email, without angle brackets.
    pub message_id: String,
    /// Message this one answers, without angle brackets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Mailer that keeps every email instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: RwLock<Vec<OutgoingEmail>>,
    fail_with: RwLock<Option<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.read().await.clone()
    }

    /// Make every following send fail with `reason` (or succeed again on `None`).
    pub async fn fail_with(&self, reason: Option<&str>) {
        *self.fail_with.write().await = reason.map(String::from);
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        if let Some(reason) = self.fail_with.read().await.clone() {
            return Err(MailError::SendFailed(reason));
        }
        self.sent.write().await.push(email.clone());
        Ok(())
    }
}
