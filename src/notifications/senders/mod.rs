use async_trait::async_trait;
use thiserror::Error;

use crate::models::{NotificationChannel, Recipient};

pub mod email;
pub mod sms;
pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("failed to send notification: {0}")]
    SendFailed(String),
    #[error("invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("templating error: {0}")]
    Templating(String),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build email: {0}")]
    EmailBuild(#[from] lettre::error::Error),
}

/// Capability interface for one delivery channel. Concrete adapters (email,
/// SMS, webhook) implement this; the dispatcher only sees the trait.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn channel(&self) -> NotificationChannel;

    /// Delivers one alert to one recipient. Adapters that are not addressed
    /// per recipient (webhook) ignore the recipient argument.
    async fn send(
        &self,
        recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<(), SenderError>;
}
