use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two kinds of monitored targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Page,
    Server,
}

/// Discrete health state of a monitored target.
///
/// `Up`/`Slow`/`Down` apply to page monitors, `Online`/`Offline` to server
/// monitors. `Unknown` is the state before the first probe completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Up,
    Slow,
    Down,
    Online,
    Offline,
    Unknown,
}

impl MonitorStatus {
    pub fn is_failing(&self) -> bool {
        matches!(self, MonitorStatus::Slow | MonitorStatus::Down | MonitorStatus::Offline)
    }
}

/// Overall system health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Healthy,
    Warning,
    Critical,
}

/// Incident severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
}

impl Severity {
    /// Maps a failing monitor status to the severity of the incident it raises.
    pub fn for_status(status: MonitorStatus) -> Option<Severity> {
        match status {
            MonitorStatus::Slow => Some(Severity::Warning),
            MonitorStatus::Down | MonitorStatus::Offline => Some(Severity::High),
            _ => None,
        }
    }
}

/// A registered target subject to periodic health probing.
///
/// Monitors are created by an external registration action and never deleted
/// automatically; deactivation flips `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    /// Target URL; unique across the fleet.
    pub url: String,
    pub name: String,
    pub kind: MonitorKind,
    pub is_active: bool,
    pub status: MonitorStatus,
    pub response_time_ms: Option<u64>,
    /// Last observed HTTP status code (page monitors).
    pub status_code: Option<u16>,
    /// Cumulative failed-probe count (server monitors).
    pub error_count: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Monitor {
    pub fn new(url: impl Into<String>, name: impl Into<String>, kind: MonitorKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            name: name.into(),
            kind,
            is_active: true,
            status: MonitorStatus::Unknown,
            response_time_ms: None,
            status_code: None,
            error_count: 0,
            last_checked_at: None,
        }
    }
}

/// The raw result of one probe against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Whether a response was received at all. HTTP-level failures (4xx/5xx)
    /// still count as `ok = true`; the classifier handles those.
    pub ok: bool,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Immutable record of system-wide health, one per health-check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthSnapshot {
    pub id: Uuid,
    pub status: SystemStatus,
    pub memory_usage_percent: f64,
    pub cpu_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub uptime_seconds: u64,
    pub active_users: u64,
    pub total_requests_today: u64,
    pub error_rate_percent: f64,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Open,
    Resolved,
}

/// Open/resolved lifecycle record tracking a monitor's failing period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    /// Monitor id this incident belongs to.
    pub target_id: Uuid,
    pub severity: Severity,
    pub state: IncidentState,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    Webhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// One delivery attempt record: (incident, recipient, channel).
///
/// Retries transition `status`; they never create new rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub channel: NotificationChannel,
    pub recipient: String,
    pub subject: String,
    pub message: String,
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
}

/// An admin recipient as returned by the recipient directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub phone: Option<String>,
}

/// One operational error entry, counted by the health aggregator and purged
/// by the retention cleaner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}
