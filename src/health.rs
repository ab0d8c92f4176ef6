//! System-wide health aggregation: process metrics plus request counters,
//! classified and persisted once per health-check run.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use sysinfo::{Disks, System};
use tracing::info;
use uuid::Uuid;

use crate::classifier::classify_system;
use crate::config::Thresholds;
use crate::models::SystemHealthSnapshot;
use crate::storage::{ErrorLogStore, HealthSnapshotStore, StoreError};

/// In-process request/session counters, rolled over at local midnight.
///
/// The embedding application records inbound requests and session activity
/// here; the aggregator only reads.
pub struct RequestStats {
    inner: StdMutex<StatsInner>,
}

struct StatsInner {
    day: NaiveDate,
    requests: u64,
    active_sessions: u64,
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(StatsInner {
                day: Local::now().date_naive(),
                requests: 0,
                active_sessions: 0,
            }),
        }
    }

    pub fn record_request(&self) {
        let mut inner = self.lock_current_day();
        inner.requests += 1;
    }

    pub fn set_active_sessions(&self, count: u64) {
        let mut inner = self.lock_current_day();
        inner.active_sessions = count;
    }

    /// Requests counted since local midnight, and the session gauge.
    pub fn today(&self) -> (u64, u64) {
        let inner = self.lock_current_day();
        (inner.requests, inner.active_sessions)
    }

    fn lock_current_day(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let today = Local::now().date_naive();
        if inner.day != today {
            inner.day = today;
            inner.requests = 0;
        }
        inner
    }
}

/// Start of the current local day, expressed in UTC.
pub fn local_midnight_utc() -> DateTime<Utc> {
    let now = Local::now();
    now.with_time(NaiveTime::MIN)
        .single()
        .unwrap_or(now)
        .with_timezone(&Utc)
}

/// Collects process metrics, classifies overall status, and appends one
/// snapshot per run.
pub struct SystemHealthAggregator {
    system: StdMutex<System>,
    disks: StdMutex<Disks>,
    stats: Arc<RequestStats>,
    snapshots: Arc<dyn HealthSnapshotStore>,
    error_logs: Arc<dyn ErrorLogStore>,
    thresholds: Thresholds,
}

impl SystemHealthAggregator {
    pub fn new(
        stats: Arc<RequestStats>,
        snapshots: Arc<dyn HealthSnapshotStore>,
        error_logs: Arc<dyn ErrorLogStore>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            system: StdMutex::new(System::new()),
            disks: StdMutex::new(Disks::new_with_refreshed_list()),
            stats,
            snapshots,
            error_logs,
            thresholds,
        }
    }

    /// Builds, classifies, and persists one snapshot.
    pub async fn collect_and_store(&self) -> Result<SystemHealthSnapshot, StoreError> {
        let (memory_usage_percent, cpu_usage_percent, disk_usage_percent) = self.host_metrics();
        let (total_requests_today, active_users) = self.stats.today();
        let errors_today = self.error_logs.count_since(local_midnight_utc()).await?;
        let error_rate_percent =
            errors_today as f64 / (total_requests_today.max(1)) as f64 * 100.0;

        let status = classify_system(error_rate_percent, memory_usage_percent, &self.thresholds);
        let snapshot = SystemHealthSnapshot {
            id: Uuid::new_v4(),
            status,
            memory_usage_percent,
            cpu_usage_percent,
            disk_usage_percent,
            uptime_seconds: System::uptime(),
            active_users,
            total_requests_today,
            error_rate_percent,
            checked_at: Utc::now(),
        };

        self.snapshots.append(snapshot.clone()).await?;
        info!(
            status = ?snapshot.status,
            memory_usage_percent = format_args!("{memory_usage_percent:.1}"),
            error_rate_percent = format_args!("{error_rate_percent:.2}"),
            "Recorded system health snapshot."
        );
        Ok(snapshot)
    }

    fn host_metrics(&self) -> (f64, f64, f64) {
        let (memory, cpu) = {
            let mut system = self
                .system
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            system.refresh_memory();
            system.refresh_cpu_usage();
            let total = system.total_memory();
            let memory = if total > 0 {
                system.used_memory() as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            (memory, system.global_cpu_usage() as f64)
        };

        let disk = {
            let mut disks = self
                .disks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            disks.refresh(true);
            let (total, available) = disks
                .list()
                .iter()
                .filter(|d| d.total_space() > 0)
                .fold((0u64, 0u64), |(t, a), d| {
                    (t + d.total_space(), a + d.available_space())
                });
            if total > 0 {
                (total.saturating_sub(available)) as f64 / total as f64 * 100.0
            } else {
                0.0
            }
        };

        (memory, cpu, disk)
    }
}
