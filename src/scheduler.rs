//! Drives the three cadences: health checks, the daily report, and retention
//! cleanup. Health-check runs never overlap; a tick landing mid-run is
//! skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::monitoring::MonitoringService;
use crate::retention::RetentionCleaner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Started,
    Skipped,
}

/// Clears the running flag on every exit path of a run, including panics.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    service: Arc<MonitoringService>,
    cleaner: Arc<RetentionCleaner>,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        service: Arc<MonitoringService>,
        cleaner: Arc<RetentionCleaner>,
        config: SchedulerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            cleaner,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    /// Spawns all three cadence loops. Each loop stops issuing work as soon
    /// as the shutdown channel flips; an in-flight health-check run keeps
    /// going until `wait_until_idle` sees it finish.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().health_check_loop()),
            tokio::spawn(self.clone().daily_loop(
                self.config.report_hour,
                DailyTask::Report,
            )),
            tokio::spawn(self.clone().daily_loop(
                self.config.cleanup_hour,
                DailyTask::Cleanup,
            )),
        ]
    }

    /// Starts a health-check run unless one is already in flight. The flag is
    /// read-checked-and-set atomically; the spawned run clears it via its
    /// guard on every exit path.
    pub fn try_run_health_check(&self) -> RunOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let service = self.service.clone();
            let flag = self.running.clone();
            tokio::spawn(async move {
                let _guard = RunGuard(flag);
                service.run_health_check().await;
            });
            RunOutcome::Started
        } else {
            warn!("Health check tick skipped: previous run still in progress.");
            RunOutcome::Skipped
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Waits up to `grace` for an in-flight run to finish. Returns whether
    /// the engine went idle within the grace period.
    pub async fn wait_until_idle(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        while self.is_running() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    async fn health_check_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        info!(
            interval_seconds = self.config.health_check_interval_secs,
            startup_delay_seconds = self.config.startup_delay_secs,
            "Health check scheduler started."
        );

        tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(Duration::from_secs(self.config.startup_delay_secs)) => {}
        }

        // The first tick fires immediately: one run shortly after start.
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.health_check_interval_secs,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("Health check scheduler stopping.");
                    break;
                }
                _ = interval.tick() => {
                    self.try_run_health_check();
                }
            }
        }
    }

    async fn daily_loop(self: Arc<Self>, hour: u32, task: DailyTask) {
        let mut shutdown = self.shutdown.clone();
        info!(hour, ?task, "Daily scheduler started.");
        loop {
            let wait = duration_until_local_hour(hour);
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!(?task, "Daily scheduler stopping.");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    match task {
                        DailyTask::Report => self.service.send_daily_report().await,
                        DailyTask::Cleanup => {
                            if let Err(e) = self.cleaner.run_cleanup().await {
                                error!(error = %e, "Retention cleanup failed.");
                            }
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum DailyTask {
    Report,
    Cleanup,
}

/// Time until the next local occurrence of `hour`:00:00.
fn duration_until_local_hour(hour: u32) -> Duration {
    let now = Local::now().naive_local();
    let target = match now.date().and_hms_opt(hour, 0, 0) {
        Some(t) if t > now => t,
        Some(t) => t + chrono::Duration::days(1),
        // Hour is validated at config load; fall back to a day from now.
        None => now + chrono::Duration::days(1),
    };
    (target - now).to_std().unwrap_or(Duration::from_secs(60))
}
