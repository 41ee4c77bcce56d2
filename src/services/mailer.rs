//! Outbound mail collaborator.
//!
//! Real SMTP/SMS delivery lives outside this crate; the shipped implementation
//! writes each message to the log so codes and links are visible to operators.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

pub struct LogMailer {
    from: String,
}

impl LogMailer {
    #[must_use]
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        if !message.to.contains('@') {
            return Err(MailError::InvalidRecipient(message.to));
        }

        info!(
            event = "mail_sent",
            from = %self.from,
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "Outbound mail"
        );

        Ok(())
    }
}
