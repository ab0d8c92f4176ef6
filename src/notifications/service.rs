//! Notification dispatch with per-row delivery tracking and bounded retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use tracing::{debug, error, info, warn};

use super::senders::{NotificationSender, SenderError};
use crate::config::DispatchConfig;
use crate::models::{DeliveryStatus, Incident, NotificationChannel, Recipient, Severity};
use crate::storage::{NotificationStore, RecipientDirectory, StoreError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Attempt N waits `base_delay * N` before retrying.
    pub base_delay: Duration,
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    /// (recipient, channel) pairs with no usable address, e.g. SMS without a
    /// phone number.
    pub skipped: usize,
}

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    recipients: Arc<dyn RecipientDirectory>,
    senders: Vec<Arc<dyn NotificationSender>>,
    retry: RetryPolicy,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        recipients: Arc<dyn RecipientDirectory>,
        senders: Vec<Arc<dyn NotificationSender>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            recipients,
            senders,
            retry,
        }
    }

    /// Fans one incident alert out to every admin recipient across all
    /// configured channels. One failed channel never blocks the others; the
    /// worst that escapes here is a store error on row bookkeeping.
    pub async fn dispatch_incident(
        &self,
        incident: &Incident,
        subject: &str,
        message: &str,
    ) -> Result<DispatchSummary, StoreError> {
        let recipients = self.recipients.list_admin_recipients().await?;
        let mut summary = DispatchSummary::default();

        for sender in &self.senders {
            for recipient in self.audience_for(sender.channel(), &recipients) {
                let Some(address) = delivery_address(sender.channel(), &recipient) else {
                    debug!(
                        channel = ?sender.channel(),
                        recipient = %recipient.email,
                        "Skipping recipient with no usable address for channel."
                    );
                    summary.skipped += 1;
                    continue;
                };

                // A store outage must not stop the alert from going out;
                // deliver anyway and log the missing bookkeeping.
                let row_id = match self
                    .store
                    .create(incident.id, sender.channel(), &address, subject, message)
                    .await
                {
                    Ok(id) => Some(id),
                    Err(e) => {
                        error!(
                            channel = ?sender.channel(),
                            recipient = %address,
                            error = %e,
                            "Could not record notification row; delivering anyway."
                        );
                        None
                    }
                };

                match self.deliver_with_retry(sender.as_ref(), &recipient, subject, message).await {
                    Ok(()) => {
                        self.mark_row(row_id, DeliveryStatus::Sent, Some(Utc::now())).await;
                        info!(channel = ?sender.channel(), recipient = %address, "Notification sent.");
                        summary.sent += 1;
                    }
                    Err(e) => {
                        self.mark_row(row_id, DeliveryStatus::Failed, None).await;
                        warn!(
                            channel = ?sender.channel(),
                            recipient = %address,
                            error = %e,
                            "Notification delivery failed after retries."
                        );
                        summary.failed += 1;
                    }
                }
            }
        }

        if incident.severity == Severity::High && summary.sent == 0 && summary.failed > 0 {
            error!(
                meta_alert = true,
                incident_id = %incident.id,
                failed = summary.failed,
                "Every notification channel failed for a critical incident."
            );
        }

        Ok(summary)
    }

    /// Sends an informational message (daily report) through every channel
    /// without creating notification rows; those track incident deliveries
    /// only.
    pub async fn broadcast(&self, subject: &str, message: &str) -> DispatchSummary {
        let recipients = match self.recipients.list_admin_recipients().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Could not list recipients for broadcast.");
                return DispatchSummary::default();
            }
        };

        let mut summary = DispatchSummary::default();
        for sender in &self.senders {
            for recipient in self.audience_for(sender.channel(), &recipients) {
                if delivery_address(sender.channel(), &recipient).is_none() {
                    summary.skipped += 1;
                    continue;
                }
                match self.deliver_with_retry(sender.as_ref(), &recipient, subject, message).await {
                    Ok(()) => summary.sent += 1,
                    Err(e) => {
                        warn!(channel = ?sender.channel(), error = %e, "Broadcast delivery failed.");
                        summary.failed += 1;
                    }
                }
            }
        }
        summary
    }

    async fn mark_row(
        &self,
        row_id: Option<Uuid>,
        status: DeliveryStatus,
        sent_at: Option<DateTime<Utc>>,
    ) {
        let Some(id) = row_id else { return };
        if let Err(e) = self.store.update_status(id, status, sent_at).await {
            error!(row = %id, error = %e, "Could not update notification row status.");
        }
    }

    /// The webhook channel addresses its endpoint once per dispatch; the
    /// other channels address every recipient.
    fn audience_for(
        &self,
        channel: NotificationChannel,
        recipients: &[Recipient],
    ) -> Vec<Recipient> {
        match channel {
            NotificationChannel::Webhook => vec![Recipient {
                email: "webhook".to_string(),
                phone: None,
            }],
            _ => recipients.to_vec(),
        }
    }

    async fn deliver_with_retry(
        &self,
        sender: &dyn NotificationSender,
        recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<(), SenderError> {
        let mut attempt: u32 = 1;
        loop {
            match sender.send(recipient, subject, message).await {
                Ok(()) => return Ok(()),
                // A missing address is permanent; retrying cannot fix it.
                Err(e @ SenderError::InvalidConfiguration(_)) => return Err(e),
                Err(e) if attempt <= self.retry.max_retries => {
                    let delay = self.retry.base_delay * attempt;
                    debug!(
                        channel = ?sender.channel(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Delivery attempt failed; retrying."
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn delivery_address(channel: NotificationChannel, recipient: &Recipient) -> Option<String> {
    match channel {
        NotificationChannel::Email => Some(recipient.email.clone()),
        NotificationChannel::Sms => recipient.phone.clone(),
        NotificationChannel::Webhook => Some("webhook".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    use crate::models::IncidentState;
    use crate::storage::memory::{MemoryNotificationStore, StaticRecipientDirectory};

    /// Fails the first `failures` sends, then succeeds.
    struct FlakySender {
        channel: NotificationChannel,
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakySender {
        fn new(channel: NotificationChannel, failures: usize) -> Self {
            Self {
                channel,
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationSender for FlakySender {
        fn channel(&self) -> NotificationChannel {
            self.channel
        }

        async fn send(&self, _: &Recipient, _: &str, _: &str) -> Result<(), SenderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(SenderError::SendFailed("transient".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn incident(severity: Severity) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            target_id: Uuid::new_v4(),
            severity,
            state: IncidentState::Open,
            opened_at: Utc::now(),
            resolved_at: None,
        }
    }

    fn recipients(with_phone: bool) -> Arc<StaticRecipientDirectory> {
        Arc::new(StaticRecipientDirectory::new(vec![Recipient {
            email: "ops@example.com".to_string(),
            phone: with_phone.then(|| "+15550100".to_string()),
        }]))
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_sent() {
        let store = Arc::new(MemoryNotificationStore::new());
        let sender = Arc::new(FlakySender::new(NotificationChannel::Email, 2));
        let service = NotificationService::new(
            store.clone(),
            recipients(false),
            vec![sender.clone()],
            fast_retry(3),
        );

        let summary = service
            .dispatch_incident(&incident(Severity::High), "s", "m")
            .await
            .unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);

        let rows = store.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, DeliveryStatus::Sent);
        assert!(rows[0].sent_at.is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_row_failed() {
        let store = Arc::new(MemoryNotificationStore::new());
        let sender = Arc::new(FlakySender::new(NotificationChannel::Email, usize::MAX));
        let service = NotificationService::new(
            store.clone(),
            recipients(false),
            vec![sender.clone()],
            fast_retry(2),
        );

        let summary = service
            .dispatch_incident(&incident(Severity::High), "s", "m")
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        // Initial attempt plus two retries.
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);

        let rows = store.all();
        assert_eq!(rows[0].status, DeliveryStatus::Failed);
        assert!(rows[0].sent_at.is_none());
    }

    #[tokio::test]
    async fn one_failed_channel_does_not_block_others() {
        let store = Arc::new(MemoryNotificationStore::new());
        let broken = Arc::new(FlakySender::new(NotificationChannel::Webhook, usize::MAX));
        let working = Arc::new(FlakySender::new(NotificationChannel::Email, 0));
        let service = NotificationService::new(
            store.clone(),
            recipients(false),
            vec![broken, working],
            fast_retry(1),
        );

        let summary = service
            .dispatch_incident(&incident(Severity::High), "s", "m")
            .await
            .unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn sms_without_phone_is_skipped_not_failed() {
        let store = Arc::new(MemoryNotificationStore::new());
        let sender = Arc::new(FlakySender::new(NotificationChannel::Sms, 0));
        let service = NotificationService::new(
            store.clone(),
            recipients(false),
            vec![sender],
            fast_retry(1),
        );

        let summary = service
            .dispatch_incident(&incident(Severity::Warning), "s", "m")
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.sent, 0);
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn every_notification_row_references_the_incident() {
        let store = Arc::new(MemoryNotificationStore::new());
        let service = NotificationService::new(
            store.clone(),
            recipients(true),
            vec![
                Arc::new(FlakySender::new(NotificationChannel::Email, 0)),
                Arc::new(FlakySender::new(NotificationChannel::Sms, 0)),
                Arc::new(FlakySender::new(NotificationChannel::Webhook, 0)),
            ],
            fast_retry(0),
        );

        let inc = incident(Severity::High);
        let summary = service.dispatch_incident(&inc, "s", "m").await.unwrap();
        assert_eq!(summary.sent, 3);
        let rows = store.all();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|n| n.incident_id == inc.id));
    }

    /// Store double simulating a persistence outage.
    struct UnavailableStore;

    #[async_trait]
    impl crate::storage::NotificationStore for UnavailableStore {
        async fn create(
            &self,
            _: Uuid,
            _: NotificationChannel,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Uuid, StoreError> {
            Err(StoreError::Backend("store offline".to_string()))
        }

        async fn update_status(
            &self,
            _: Uuid,
            _: DeliveryStatus,
            _: Option<chrono::DateTime<Utc>>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn store_outage_does_not_abort_the_fan_out() {
        let email = Arc::new(FlakySender::new(NotificationChannel::Email, 0));
        let webhook = Arc::new(FlakySender::new(NotificationChannel::Webhook, 0));
        let service = NotificationService::new(
            Arc::new(UnavailableStore),
            recipients(false),
            vec![email.clone(), webhook.clone()],
            fast_retry(0),
        );

        // Alerts still go out even when no row can be recorded.
        let summary = service
            .dispatch_incident(&incident(Severity::High), "s", "m")
            .await
            .unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(email.calls.load(Ordering::SeqCst), 1);
        assert_eq!(webhook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcast_creates_no_rows() {
        let store = Arc::new(MemoryNotificationStore::new());
        let service = NotificationService::new(
            store.clone(),
            recipients(false),
            vec![Arc::new(FlakySender::new(NotificationChannel::Email, 0))],
            fast_retry(0),
        );

        let summary = service.broadcast("daily report", "all good").await;
        assert_eq!(summary.sent, 1);
        assert!(store.all().is_empty());
    }
}
