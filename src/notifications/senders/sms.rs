use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{NotificationSender, SenderError};
use crate::config::SmsConfig;
use crate::models::{NotificationChannel, Recipient};

/// Delivers alerts through an HTTP SMS provider gateway.
pub struct SmsSender {
    client: Client,
    api_url: String,
    api_token: String,
}

#[derive(Serialize)]
struct SmsPayload<'a> {
    to: &'a str,
    message: &'a str,
}

impl SmsSender {
    pub fn new(config: &SmsConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.api_url.clone(),
            api_token: config.api_token.clone(),
        }
    }
}

#[async_trait]
impl NotificationSender for SmsSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Sms
    }

    async fn send(
        &self,
        recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<(), SenderError> {
        let phone = recipient.phone.as_deref().ok_or_else(|| {
            SenderError::InvalidConfiguration(format!(
                "recipient {} has no phone number",
                recipient.email
            ))
        })?;

        let text = format!("{subject}: {message}");
        let payload = SmsPayload {
            to: phone,
            message: &text,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "SMS provider returned {status}: {body}"
            )));
        }
        Ok(())
    }
}
