pub mod classifier;
pub mod config;
pub mod health;
pub mod incident;
pub mod models;
pub mod monitoring;
pub mod notifications;
pub mod probe;
pub mod retention;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;
use crate::health::{RequestStats, SystemHealthAggregator};
use crate::incident::{EscalationPolicy, IncidentManager};
use crate::models::{Monitor, Recipient};
use crate::monitoring::MonitoringService;
use crate::notifications::senders::email::EmailSender;
use crate::notifications::senders::sms::SmsSender;
use crate::notifications::senders::webhook::WebhookSender;
use crate::notifications::senders::NotificationSender;
use crate::notifications::service::{NotificationService, RetryPolicy};
use crate::retention::RetentionCleaner;
use crate::scheduler::Scheduler;
use crate::storage::memory::{
    MemoryErrorLogStore, MemoryIncidentStore, MemoryMonitorRepository, MemoryNotificationStore,
    MemorySnapshotStore, StaticRecipientDirectory,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "sitewatch.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler.");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT."),
        _ = terminate => info!("Received SIGTERM."),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    init_logging();
    dotenv().ok();
    info!("Starting sitewatch monitoring engine.");

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Failed to load configuration.");
            return Err(e.into());
        }
    };

    // --- Stores ---
    let monitors = Arc::new(MemoryMonitorRepository::new());
    for seed in &config.monitors {
        monitors.insert(Monitor::new(seed.url.clone(), seed.name.clone(), seed.kind));
    }
    info!(count = config.monitors.len(), "Seeded monitors from configuration.");

    let snapshots = Arc::new(MemorySnapshotStore::new());
    let error_logs = Arc::new(MemoryErrorLogStore::new());
    let incident_store = Arc::new(MemoryIncidentStore::new());
    let notification_store = Arc::new(MemoryNotificationStore::new());
    let recipients = Arc::new(StaticRecipientDirectory::new(
        config
            .recipients
            .iter()
            .map(|r| Recipient {
                email: r.email.clone(),
                phone: r.phone.clone(),
            })
            .collect(),
    ));

    // --- Channel adapters ---
    let mut senders: Vec<Arc<dyn NotificationSender>> = Vec::new();
    if config.smtp.enabled {
        senders.push(Arc::new(EmailSender::new(&config.smtp)?));
    }
    if config.sms.enabled {
        senders.push(Arc::new(SmsSender::new(&config.sms)));
    }
    if config.webhook.enabled {
        senders.push(Arc::new(WebhookSender::new(&config.webhook)));
    }
    if senders.is_empty() {
        warn!("No notification channels enabled; incidents will only be logged.");
    }

    // --- Services ---
    let stats = Arc::new(RequestStats::new());
    let aggregator = Arc::new(SystemHealthAggregator::new(
        stats.clone(),
        snapshots.clone(),
        error_logs.clone(),
        config.thresholds.clone(),
    ));
    let policy = EscalationPolicy::from_config(&config.dispatch.renotify_policy)
        .unwrap_or(EscalationPolicy::Escalation);
    let notifier = Arc::new(NotificationService::new(
        notification_store,
        recipients,
        senders,
        RetryPolicy::from(&config.dispatch),
    ));
    let service = Arc::new(MonitoringService::new(
        config.clone(),
        monitors,
        snapshots.clone(),
        error_logs.clone(),
        IncidentManager::new(incident_store, policy),
        notifier,
        aggregator,
    ));
    let cleaner = Arc::new(RetentionCleaner::new(
        snapshots,
        error_logs,
        config.retention.clone(),
    ));

    // --- Scheduler & lifecycle ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Scheduler::new(
        service,
        cleaner,
        config.scheduler.clone(),
        shutdown_rx,
    ));
    let handles = scheduler.clone().start();

    shutdown_signal().await;
    info!("Shutdown signal received; stopping schedulers.");
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(config.scheduler.shutdown_grace_secs);
    if let Err(e) = tokio::time::timeout(grace, futures::future::join_all(handles)).await {
        warn!(error = %e, "Cadence loops did not stop within the grace period.");
    }
    if !scheduler.wait_until_idle(grace).await {
        warn!("In-flight health check did not finish within the grace period.");
    }

    info!("Shutdown complete.");
    Ok(())
}
