//! One health-check run end to end: concurrent probe fan-out, classification,
//! persistence, incident transitions, and alert dispatch.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::classifier::{classify_page, classify_server};
use crate::config::AppConfig;
use crate::health::SystemHealthAggregator;
use crate::incident::{IncidentManager, IncidentOutcome};
use crate::models::{
    ErrorLogEntry, Monitor, MonitorKind, MonitorStatus, Observation, Severity,
};
use crate::notifications::service::NotificationService;
use crate::probe::Prober;
use crate::storage::{ErrorLogStore, HealthSnapshotStore, MonitorRepository};

#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub checked: usize,
    pub failing: usize,
    pub incidents_opened: usize,
    pub incidents_resolved: usize,
}

/// The monitoring engine, explicitly constructed with injected stores and
/// channel adapters so tests can swap in doubles.
pub struct MonitoringService {
    config: Arc<AppConfig>,
    prober: Prober,
    monitors: Arc<dyn MonitorRepository>,
    snapshots: Arc<dyn HealthSnapshotStore>,
    error_logs: Arc<dyn ErrorLogStore>,
    incidents: IncidentManager,
    notifier: Arc<NotificationService>,
    aggregator: Arc<SystemHealthAggregator>,
}

impl MonitoringService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AppConfig>,
        monitors: Arc<dyn MonitorRepository>,
        snapshots: Arc<dyn HealthSnapshotStore>,
        error_logs: Arc<dyn ErrorLogStore>,
        incidents: IncidentManager,
        notifier: Arc<NotificationService>,
        aggregator: Arc<SystemHealthAggregator>,
    ) -> Self {
        Self {
            config,
            prober: Prober::new(),
            monitors,
            snapshots,
            error_logs,
            incidents,
            notifier,
            aggregator,
        }
    }

    /// Executes one full health-check run. The system snapshot is computed
    /// independently of (and concurrently with) target probing. All failures
    /// inside the run are contained; this never returns an error that would
    /// abort the scheduler.
    pub async fn run_health_check(&self) -> RunStats {
        let started = Instant::now();
        let (stats, snapshot) = tokio::join!(
            self.probe_all_targets(),
            self.aggregator.collect_and_store()
        );
        if let Err(e) = snapshot {
            error!(error = %e, "Failed to record system health snapshot.");
            self.log_operational_error(format!("snapshot persist failed: {e}"))
                .await;
        }
        info!(
            checked = stats.checked,
            failing = stats.failing,
            opened = stats.incidents_opened,
            resolved = stats.incidents_resolved,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Health check run finished."
        );
        stats
    }

    async fn probe_all_targets(&self) -> RunStats {
        let mut targets: Vec<Monitor> = Vec::new();
        for kind in [MonitorKind::Page, MonitorKind::Server] {
            match self.monitors.list_active(kind).await {
                Ok(monitors) => targets.extend(monitors),
                Err(e) => {
                    error!(?kind, error = %e, "Could not list active monitors; continuing without them.");
                    self.log_operational_error(format!("monitor listing failed: {e}"))
                        .await;
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.probe.max_concurrent_probes));
        let probes = targets.into_iter().map(|monitor| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await;
                let timeout = self.config.probe.timeout_for(monitor.kind);
                let observation = self.prober.probe(&monitor.url, timeout).await;
                let status = match monitor.kind {
                    MonitorKind::Page => classify_page(&observation, &self.config.thresholds),
                    MonitorKind::Server => classify_server(&observation),
                };
                (monitor, observation, status)
            }
        });
        let results = join_all(probes).await;

        let mut stats = RunStats {
            checked: results.len(),
            ..RunStats::default()
        };
        let mut pending_alerts = Vec::new();
        for (monitor, observation, status) in results {
            self.persist_status(&monitor, &observation, status).await;
            if status.is_failing() {
                stats.failing += 1;
            }
            if let Some(incident) = self
                .apply_transition(&monitor, &observation, status, &mut stats)
                .await
            {
                pending_alerts.push((incident, monitor, observation, status));
            }
        }

        // Deliveries stay sequential within an incident, but one incident's
        // retry schedule must not delay another incident's first attempt.
        join_all(pending_alerts.iter().map(|(incident, monitor, observation, status)| {
            self.dispatch_alert(incident, monitor, observation, *status)
        }))
        .await;
        stats
    }

    async fn persist_status(
        &self,
        monitor: &Monitor,
        observation: &Observation,
        status: MonitorStatus,
    ) {
        let response_time = observation.ok.then_some(observation.latency_ms);
        if let Err(e) = self
            .monitors
            .upsert_status(monitor.id, status, response_time, observation.status_code, Utc::now())
            .await
        {
            // A failed persist for one monitor must not abort the others.
            error!(monitor = %monitor.name, error = %e, "Failed to persist monitor status.");
            self.log_operational_error(format!(
                "status persist failed for {}: {e}",
                monitor.url
            ))
            .await;
        }
    }

    /// Drives the incident state machine for one result and returns the
    /// incident to alert on, if the transition warrants one.
    async fn apply_transition(
        &self,
        monitor: &Monitor,
        observation: &Observation,
        status: MonitorStatus,
        stats: &mut RunStats,
    ) -> Option<crate::models::Incident> {
        if status.is_failing() {
            let severity = Severity::for_status(status)?;
            self.log_operational_error(format!(
                "{} ({}) is {:?}: {}",
                monitor.name,
                monitor.url,
                status,
                observation.error.as_deref().unwrap_or("no transport error")
            ))
            .await;

            match self.incidents.record_failure(monitor.id, severity).await {
                Ok(IncidentOutcome::Opened(incident)) => {
                    stats.incidents_opened += 1;
                    Some(incident)
                }
                Ok(IncidentOutcome::Escalated(incident)) => Some(incident),
                Ok(_) => None,
                Err(e) => {
                    error!(monitor = %monitor.name, error = %e, "Incident bookkeeping failed.");
                    None
                }
            }
        } else {
            match self.incidents.record_success(monitor.id).await {
                Ok(IncidentOutcome::Resolved(_)) => stats.incidents_resolved += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(monitor = %monitor.name, error = %e, "Incident bookkeeping failed.");
                }
            }
            None
        }
    }

    async fn dispatch_alert(
        &self,
        incident: &crate::models::Incident,
        monitor: &Monitor,
        observation: &Observation,
        status: MonitorStatus,
    ) {
        let subject = format!("{} is {}", monitor.name, status_word(status));
        let detail = match (&observation.error, observation.status_code) {
            (Some(err), _) => err.clone(),
            (None, Some(code)) => format!("HTTP {code} in {}ms", observation.latency_ms),
            (None, None) => format!("{}ms", observation.latency_ms),
        };
        let message = format!("{}: {detail}", monitor.url);

        match self.notifier.dispatch_incident(incident, &subject, &message).await {
            Ok(summary) => {
                if summary.failed > 0 {
                    self.log_operational_error(format!(
                        "{} notification deliveries failed for {}",
                        summary.failed, monitor.url
                    ))
                    .await;
                }
            }
            Err(e) => {
                error!(monitor = %monitor.name, error = %e, "Notification dispatch failed.");
                self.log_operational_error(format!("dispatch failed for {}: {e}", monitor.url))
                    .await;
            }
        }
    }

    /// Compiles the daily summary and broadcasts it through every channel.
    pub async fn send_daily_report(&self) {
        let mut lines = Vec::new();
        let mut failing = 0usize;
        let mut total = 0usize;
        for kind in [MonitorKind::Page, MonitorKind::Server] {
            if let Ok(monitors) = self.monitors.list_active(kind).await {
                for m in &monitors {
                    if m.status.is_failing() {
                        failing += 1;
                        lines.push(format!("  {} ({}): {:?}", m.name, m.url, m.status));
                    }
                }
                total += monitors.len();
            }
        }
        let open_incidents = self
            .incidents_open_count()
            .await
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        let snapshots = self
            .snapshots
            .count()
            .await
            .map(|n| n.to_string())
            .unwrap_or_else(|_| "?".to_string());

        let mut message = format!(
            "{total} monitors active, {failing} failing. Open incidents: {open_incidents}. Snapshots retained: {snapshots}."
        );
        if !lines.is_empty() {
            message.push_str("\nFailing targets:\n");
            message.push_str(&lines.join("\n"));
        }

        let summary = self.notifier.broadcast("Daily monitoring summary", &message).await;
        info!(
            sent = summary.sent,
            failed = summary.failed,
            "Daily summary report dispatched."
        );
    }

    async fn incidents_open_count(&self) -> Option<usize> {
        self.incidents.open_count().await.ok()
    }

    async fn log_operational_error(&self, message: String) {
        if let Err(e) = self
            .error_logs
            .append(ErrorLogEntry {
                at: Utc::now(),
                message,
            })
            .await
        {
            error!(error = %e, "Could not append to the error log.");
        }
    }
}

fn status_word(status: MonitorStatus) -> &'static str {
    match status {
        MonitorStatus::Up => "up",
        MonitorStatus::Slow => "slow",
        MonitorStatus::Down => "down",
        MonitorStatus::Online => "online",
        MonitorStatus::Offline => "offline",
        MonitorStatus::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::health::RequestStats;
    use crate::incident::EscalationPolicy;
    use crate::models::{DeliveryStatus, IncidentState, NotificationChannel, Recipient};
    use crate::notifications::senders::{NotificationSender, SenderError};
    use crate::notifications::service::RetryPolicy;
    use crate::storage::memory::{
        MemoryErrorLogStore, MemoryIncidentStore, MemoryMonitorRepository,
        MemoryNotificationStore, MemorySnapshotStore, StaticRecipientDirectory,
    };
    use crate::storage::IncidentStore;

    struct AlwaysOkSender;

    #[async_trait]
    impl NotificationSender for AlwaysOkSender {
        fn channel(&self) -> NotificationChannel {
            NotificationChannel::Email
        }

        async fn send(&self, _: &Recipient, _: &str, _: &str) -> Result<(), SenderError> {
            Ok(())
        }
    }

    struct Harness {
        service: MonitoringService,
        monitors: Arc<MemoryMonitorRepository>,
        incidents: Arc<MemoryIncidentStore>,
        notifications: Arc<MemoryNotificationStore>,
        snapshots: Arc<MemorySnapshotStore>,
    }

    fn harness(config: AppConfig) -> Harness {
        harness_with_sender(config, Arc::new(AlwaysOkSender))
    }

    fn harness_with_sender(mut config: AppConfig, sender: Arc<dyn NotificationSender>) -> Harness {
        config.probe.page_timeout_secs = 1;
        config.probe.server_timeout_secs = 1;
        let config = Arc::new(config);

        let monitors = Arc::new(MemoryMonitorRepository::new());
        let incidents = Arc::new(MemoryIncidentStore::new());
        let notifications = Arc::new(MemoryNotificationStore::new());
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let error_logs = Arc::new(MemoryErrorLogStore::new());

        let recipients = Arc::new(StaticRecipientDirectory::new(vec![
            Recipient {
                email: "a@example.com".to_string(),
                phone: None,
            },
            Recipient {
                email: "b@example.com".to_string(),
                phone: None,
            },
        ]));
        let notifier = Arc::new(NotificationService::new(
            notifications.clone(),
            recipients,
            vec![sender],
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            },
        ));
        let aggregator = Arc::new(SystemHealthAggregator::new(
            Arc::new(RequestStats::new()),
            snapshots.clone(),
            error_logs.clone(),
            config.thresholds.clone(),
        ));
        let service = MonitoringService::new(
            config,
            monitors.clone(),
            snapshots.clone(),
            error_logs,
            IncidentManager::new(incidents.clone(), EscalationPolicy::Escalation),
            notifier,
            aggregator,
        );
        Harness {
            service,
            monitors,
            incidents,
            notifications,
            snapshots,
        }
    }

    #[tokio::test]
    async fn timed_out_page_opens_high_incident_and_notifies_each_recipient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let h = harness(AppConfig::default());
        let monitor = Monitor::new(server.uri(), "example health", MonitorKind::Page);
        let monitor_id = monitor.id;
        h.monitors.insert(monitor);

        let stats = h.service.run_health_check().await;
        assert_eq!(stats.checked, 1);
        assert_eq!(stats.incidents_opened, 1);

        let stored = h.monitors.get(monitor_id).unwrap();
        assert_eq!(stored.status, MonitorStatus::Down);
        assert!(stored.response_time_ms.is_none());

        let incidents = h.incidents.all().await;
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].severity, Severity::High);
        assert_eq!(incidents[0].state, IncidentState::Open);

        // One row per admin recipient, all terminal.
        let rows = h.notifications.all();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|n| n.status == DeliveryStatus::Sent));

        // The snapshot side ran independently of the failing probe.
        assert_eq!(h.snapshots.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recovery_resolves_without_duplicate_incidents() {
        let server = MockServer::start().await;
        let failing = Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount_as_scoped(&server)
            .await;

        let h = harness(AppConfig::default());
        let monitor = Monitor::new(server.uri(), "backend", MonitorKind::Server);
        h.monitors.insert(monitor);

        h.service.run_health_check().await;
        h.service.run_health_check().await;
        // Repeated failures: still exactly one open incident, one dispatch.
        let open = h.incidents.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(h.notifications.all().len(), 2); // one per recipient

        drop(failing);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let stats = h.service.run_health_check().await;
        assert_eq!(stats.incidents_resolved, 1);
        assert!(h.incidents.list_open().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn degraded_page_opens_warning_then_escalates_on_outage() {
        let server = MockServer::start().await;
        let slow = Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount_as_scoped(&server)
            .await;

        let h = harness(AppConfig::default());
        let monitor = Monitor::new(server.uri(), "storefront", MonitorKind::Page);
        h.monitors.insert(monitor);

        h.service.run_health_check().await;
        let open = h.incidents.list_open().await.unwrap();
        assert_eq!(open[0].severity, Severity::Warning);
        let after_first = h.notifications.all().len();

        drop(slow);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        h.service.run_health_check().await;
        let open = h.incidents.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].severity, Severity::High);
        // Escalation re-notified.
        assert!(h.notifications.all().len() > after_first);
    }

    /// Parks every delivery until one send from each of two incidents has
    /// started. Deadlocks (and times out) if dispatch is serialized across
    /// incidents.
    struct PairedSender {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl NotificationSender for PairedSender {
        fn channel(&self) -> NotificationChannel {
            NotificationChannel::Email
        }

        async fn send(&self, _: &Recipient, _: &str, _: &str) -> Result<(), SenderError> {
            self.barrier.wait().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn alerts_for_distinct_incidents_are_dispatched_concurrently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let h = harness_with_sender(
            AppConfig::default(),
            Arc::new(PairedSender {
                barrier: tokio::sync::Barrier::new(2),
            }),
        );
        h.monitors.insert(Monitor::new(
            format!("{}/api", server.uri()),
            "api",
            MonitorKind::Server,
        ));
        h.monitors.insert(Monitor::new(
            format!("{}/worker", server.uri()),
            "worker",
            MonitorKind::Server,
        ));

        let stats = tokio::time::timeout(Duration::from_secs(5), h.service.run_health_check())
            .await
            .expect("one incident's dispatch blocked the other's");
        assert_eq!(stats.incidents_opened, 2);

        let rows = h.notifications.all();
        assert_eq!(rows.len(), 4); // two incidents x two recipients
        assert!(rows.iter().all(|n| n.status == DeliveryStatus::Sent));
    }

    #[tokio::test]
    async fn empty_fleet_still_records_a_snapshot() {
        let h = harness(AppConfig::default());
        let stats = h.service.run_health_check().await;
        assert_eq!(stats.checked, 0);
        assert_eq!(h.snapshots.count().await.unwrap(), 1);
    }
}
