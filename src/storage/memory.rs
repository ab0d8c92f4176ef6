//! In-memory store implementations. These back standalone deployments and
//! tests; a database-backed deployment swaps them out behind the same traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ErrorLogStore, HealthSnapshotStore, IncidentStore, MonitorRepository, NotificationStore,
    RecipientDirectory, StoreError,
};
use crate::models::{
    DeliveryStatus, ErrorLogEntry, Incident, IncidentState, Monitor, MonitorKind, MonitorStatus,
    Notification, NotificationChannel, Recipient, Severity, SystemHealthSnapshot,
};

#[derive(Default)]
pub struct MemoryMonitorRepository {
    monitors: DashMap<Uuid, Monitor>,
}

impl MemoryMonitorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, monitor: Monitor) {
        self.monitors.insert(monitor.id, monitor);
    }

    pub fn get(&self, id: Uuid) -> Option<Monitor> {
        self.monitors.get(&id).map(|m| m.clone())
    }
}

#[async_trait]
impl MonitorRepository for MemoryMonitorRepository {
    async fn list_active(&self, kind: MonitorKind) -> Result<Vec<Monitor>, StoreError> {
        Ok(self
            .monitors
            .iter()
            .filter(|m| m.is_active && m.kind == kind)
            .map(|m| m.clone())
            .collect())
    }

    async fn upsert_status(
        &self,
        id: Uuid,
        status: MonitorStatus,
        response_time_ms: Option<u64>,
        status_code: Option<u16>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut monitor = self
            .monitors
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("monitor {id}")))?;
        monitor.status = status;
        monitor.response_time_ms = response_time_ms;
        monitor.last_checked_at = Some(checked_at);
        match monitor.kind {
            MonitorKind::Page => monitor.status_code = status_code,
            MonitorKind::Server => {
                if status.is_failing() {
                    monitor.error_count += 1;
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<Vec<SystemHealthSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<SystemHealthSnapshot> {
        self.snapshots.lock().await.clone()
    }
}

#[async_trait]
impl HealthSnapshotStore for MemorySnapshotStore {
    async fn append(&self, snapshot: SystemHealthSnapshot) -> Result<(), StoreError> {
        self.snapshots.lock().await.push(snapshot);
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut snapshots = self.snapshots.lock().await;
        let before = snapshots.len();
        snapshots.retain(|s| s.checked_at >= cutoff);
        Ok((before - snapshots.len()) as u64)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.snapshots.lock().await.len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: Mutex<Vec<Incident>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Incident> {
        self.incidents.lock().await.clone()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn find_open(&self, target_id: Uuid) -> Result<Option<Incident>, StoreError> {
        Ok(self
            .incidents
            .lock()
            .await
            .iter()
            .find(|i| i.target_id == target_id && i.state == IncidentState::Open)
            .cloned())
    }

    async fn open(&self, target_id: Uuid, severity: Severity) -> Result<Incident, StoreError> {
        let mut incidents = self.incidents.lock().await;
        if incidents
            .iter()
            .any(|i| i.target_id == target_id && i.state == IncidentState::Open)
        {
            return Err(StoreError::Conflict(format!(
                "target {target_id} already has an open incident"
            )));
        }
        let incident = Incident {
            id: Uuid::new_v4(),
            target_id,
            severity,
            state: IncidentState::Open,
            opened_at: Utc::now(),
            resolved_at: None,
        };
        incidents.push(incident.clone());
        Ok(incident)
    }

    async fn update_severity(
        &self,
        incident_id: Uuid,
        severity: Severity,
    ) -> Result<Incident, StoreError> {
        let mut incidents = self.incidents.lock().await;
        let incident = incidents
            .iter_mut()
            .find(|i| i.id == incident_id)
            .ok_or_else(|| StoreError::NotFound(format!("incident {incident_id}")))?;
        incident.severity = severity;
        Ok(incident.clone())
    }

    async fn resolve(&self, target_id: Uuid) -> Result<Option<Incident>, StoreError> {
        let mut incidents = self.incidents.lock().await;
        let open = incidents
            .iter_mut()
            .find(|i| i.target_id == target_id && i.state == IncidentState::Open);
        match open {
            Some(incident) => {
                incident.state = IncidentState::Resolved;
                incident.resolved_at = Some(Utc::now());
                Ok(Some(incident.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list_open(&self) -> Result<Vec<Incident>, StoreError> {
        Ok(self
            .incidents
            .lock()
            .await
            .iter()
            .filter(|i| i.state == IncidentState::Open)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: DashMap<Uuid, Notification>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.notifications.iter().map(|n| n.clone()).collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(
        &self,
        incident_id: Uuid,
        channel: NotificationChannel,
        recipient: &str,
        subject: &str,
        message: &str,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.notifications.insert(
            id,
            Notification {
                id,
                incident_id,
                channel,
                recipient: recipient.to_string(),
                subject: subject.to_string(),
                message: message.to_string(),
                status: DeliveryStatus::Pending,
                sent_at: None,
            },
        );
        Ok(id)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut notification = self
            .notifications
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("notification {id}")))?;
        notification.status = status;
        notification.sent_at = sent_at;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryErrorLogStore {
    entries: Mutex<Vec<ErrorLogEntry>>,
}

impl MemoryErrorLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ErrorLogStore for MemoryErrorLogStore {
    async fn append(&self, entry: ErrorLogEntry) -> Result<(), StoreError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| e.at >= since)
            .count() as u64)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

/// Recipient directory backed by the static list from configuration.
pub struct StaticRecipientDirectory {
    recipients: Vec<Recipient>,
}

impl StaticRecipientDirectory {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self { recipients }
    }
}

#[async_trait]
impl RecipientDirectory for StaticRecipientDirectory {
    async fn list_admin_recipients(&self) -> Result<Vec<Recipient>, StoreError> {
        Ok(self.recipients.clone())
    }
}
