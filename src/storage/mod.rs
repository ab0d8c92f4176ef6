//! Abstract stores consumed by the engine. Persistence technology is an
//! external collaborator; the engine only sees these seams.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    DeliveryStatus, ErrorLogEntry, Incident, Monitor, MonitorKind, MonitorStatus,
    NotificationChannel, Recipient, Severity, SystemHealthSnapshot,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("constraint violated: {0}")]
    Conflict(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Store of monitor definitions and their last-known status.
#[async_trait]
pub trait MonitorRepository: Send + Sync {
    async fn list_active(&self, kind: MonitorKind) -> Result<Vec<Monitor>, StoreError>;

    /// Persists the outcome of one probe. For server monitors a failing
    /// status also bumps the cumulative error count.
    async fn upsert_status(
        &self,
        id: Uuid,
        status: MonitorStatus,
        response_time_ms: Option<u64>,
        status_code: Option<u16>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Append-only store of system health snapshots.
#[async_trait]
pub trait HealthSnapshotStore: Send + Sync {
    async fn append(&self, snapshot: SystemHealthSnapshot) -> Result<(), StoreError>;

    /// Deletes snapshots older than `cutoff`; returns the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn find_open(&self, target_id: Uuid) -> Result<Option<Incident>, StoreError>;
    async fn open(&self, target_id: Uuid, severity: Severity) -> Result<Incident, StoreError>;
    async fn update_severity(
        &self,
        incident_id: Uuid,
        severity: Severity,
    ) -> Result<Incident, StoreError>;
    async fn resolve(&self, target_id: Uuid) -> Result<Option<Incident>, StoreError>;
    async fn list_open(&self) -> Result<Vec<Incident>, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(
        &self,
        incident_id: Uuid,
        channel: NotificationChannel,
        recipient: &str,
        subject: &str,
        message: &str,
    ) -> Result<Uuid, StoreError>;

    async fn update_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}

/// Store of operational error entries, counted by the health aggregator and
/// purged by the retention cleaner.
#[async_trait]
pub trait ErrorLogStore: Send + Sync {
    async fn append(&self, entry: ErrorLogEntry) -> Result<(), StoreError>;
    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Directory of admin accounts that receive alerts.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn list_admin_recipients(&self) -> Result<Vec<Recipient>, StoreError>;
}
