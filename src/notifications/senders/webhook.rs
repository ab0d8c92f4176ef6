use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client};
use serde::Serialize;

use super::{NotificationSender, SenderError};
use crate::config::WebhookConfig;
use crate::models::{NotificationChannel, Recipient};

/// Delivers alerts as a JSON POST to a configured webhook endpoint. Not
/// addressed per recipient; the endpoint itself is the audience.
pub struct WebhookSender {
    client: Client,
    url: String,
}

/// JSON envelope posted to the webhook.
#[derive(Serialize)]
struct WebhookEnvelope<'a> {
    text: &'a str,
    timestamp: String,
    source: &'a str,
}

impl WebhookSender {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            client: Client::new(),
            url: config.url.clone(),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Webhook
    }

    async fn send(
        &self,
        _recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<(), SenderError> {
        let text = format!("{subject}: {message}");
        let envelope = WebhookEnvelope {
            text: &text,
            timestamp: Utc::now().to_rfc3339(),
            source: "sitewatch",
        };

        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "webhook returned non-success status {status}: {body}"
            )));
        }
        Ok(())
    }
}
