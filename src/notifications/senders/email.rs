use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tera::{Context, Tera};

use super::{NotificationSender, SenderError};
use crate::config::SmtpConfig;
use crate::models::{NotificationChannel, Recipient};

/// HTML alert body. Rendered from (subject, message, timestamp) only, so no
/// secret can leak through the template context.
const ALERT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; color: #222;">
  <h2 style="color: #b91c1c;">{{ subject }}</h2>
  <p>{{ message }}</p>
  <hr>
  <p style="color: #666; font-size: 12px;">Sent by sitewatch at {{ timestamp }}</p>
</body>
</html>
"#;

/// Delivers alerts over SMTP.
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, SenderError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            .port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
            from: config.from.clone(),
        })
    }

    /// Renders the HTML body. Pure in (subject, message, timestamp).
    pub fn render_body(subject: &str, message: &str, timestamp: &str) -> Result<String, SenderError> {
        let mut context = Context::new();
        context.insert("subject", subject);
        context.insert("message", message);
        context.insert("timestamp", timestamp);
        Tera::one_off(ALERT_TEMPLATE, &context, true)
            .map_err(|e| SenderError::Templating(e.to_string()))
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    async fn send(
        &self,
        recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<(), SenderError> {
        let body = Self::render_body(subject, message, &Utc::now().to_rfc3339())?;
        let email = Message::builder()
            .from(self.from.parse()?)
            .to(recipient.email.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)?;

        self.transport.send(email).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_contains_subject_message_and_timestamp() {
        let body =
            EmailSender::render_body("Page down", "https://example.com is down", "2026-01-01")
                .unwrap();
        assert!(body.contains("Page down"));
        assert!(body.contains("https:&#x2F;&#x2F;example.com is down") || body.contains("https://example.com is down"));
        assert!(body.contains("2026-01-01"));
    }

    #[test]
    fn body_escapes_html_in_inputs() {
        let body = EmailSender::render_body("<script>x</script>", "msg", "t").unwrap();
        assert!(!body.contains("<script>x</script>"));
    }
}
