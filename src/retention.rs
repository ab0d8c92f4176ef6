//! Retention cleanup for historical records.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use crate::config::RetentionConfig;
use crate::storage::{ErrorLogStore, HealthSnapshotStore, StoreError};

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
    pub snapshots_removed: u64,
    pub error_logs_removed: u64,
}

/// Purges health snapshots and error-log entries past their retention
/// windows. Idempotent: a second run with no new data removes nothing.
pub struct RetentionCleaner {
    snapshots: Arc<dyn HealthSnapshotStore>,
    error_logs: Arc<dyn ErrorLogStore>,
    config: RetentionConfig,
}

impl RetentionCleaner {
    pub fn new(
        snapshots: Arc<dyn HealthSnapshotStore>,
        error_logs: Arc<dyn ErrorLogStore>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            snapshots,
            error_logs,
            config,
        }
    }

    pub async fn run_cleanup(&self) -> Result<CleanupReport, StoreError> {
        let now = Utc::now();
        let snapshot_cutoff = now - Duration::days(self.config.snapshot_retention_days);
        let error_log_cutoff = now - Duration::days(self.config.error_log_retention_days);

        let snapshots_removed = self.snapshots.delete_older_than(snapshot_cutoff).await?;
        let error_logs_removed = self.error_logs.delete_older_than(error_log_cutoff).await?;

        info!(
            snapshots_removed,
            error_logs_removed,
            snapshot_retention_days = self.config.snapshot_retention_days,
            error_log_retention_days = self.config.error_log_retention_days,
            "Retention cleanup finished."
        );
        Ok(CleanupReport {
            snapshots_removed,
            error_logs_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorLogEntry, SystemHealthSnapshot, SystemStatus};
    use crate::storage::memory::{MemoryErrorLogStore, MemorySnapshotStore};
    use uuid::Uuid;

    fn snapshot(age_days: i64) -> SystemHealthSnapshot {
        SystemHealthSnapshot {
            id: Uuid::new_v4(),
            status: SystemStatus::Healthy,
            memory_usage_percent: 10.0,
            cpu_usage_percent: 5.0,
            disk_usage_percent: 20.0,
            uptime_seconds: 1000,
            active_users: 0,
            total_requests_today: 0,
            error_rate_percent: 0.0,
            checked_at: Utc::now() - Duration::days(age_days),
        }
    }

    fn cleaner(
        snapshots: Arc<MemorySnapshotStore>,
        error_logs: Arc<MemoryErrorLogStore>,
    ) -> RetentionCleaner {
        RetentionCleaner::new(snapshots, error_logs, RetentionConfig::default())
    }

    #[tokio::test]
    async fn removes_only_records_past_their_windows() {
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let error_logs = Arc::new(MemoryErrorLogStore::new());
        for age in [0, 3, 8, 30] {
            snapshots.append(snapshot(age)).await.unwrap();
        }
        for age in [1, 29, 31] {
            error_logs
                .append(ErrorLogEntry {
                    at: Utc::now() - Duration::days(age),
                    message: "old error".to_string(),
                })
                .await
                .unwrap();
        }

        let report = cleaner(snapshots.clone(), error_logs)
            .run_cleanup()
            .await
            .unwrap();
        assert_eq!(report.snapshots_removed, 2);
        assert_eq!(report.error_logs_removed, 1);
        assert_eq!(snapshots.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn second_run_with_no_new_data_removes_nothing() {
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let error_logs = Arc::new(MemoryErrorLogStore::new());
        snapshots.append(snapshot(10)).await.unwrap();

        let cleaner = cleaner(snapshots, error_logs);
        let first = cleaner.run_cleanup().await.unwrap();
        assert_eq!(first.snapshots_removed, 1);

        let second = cleaner.run_cleanup().await.unwrap();
        assert_eq!(second.snapshots_removed, 0);
        assert_eq!(second.error_logs_removed, 0);
    }
}
