use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::models::MonitorKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Classification thresholds. Operators tune these without a rebuild, via the
/// config file or the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Latency above which an otherwise-successful page response is `slow`.
    pub slow_latency_ms: u64,
    /// Latency above which an errored page response is `slow` rather than `up`.
    pub slow_error_latency_ms: u64,
    pub warning_error_rate_percent: f64,
    pub critical_error_rate_percent: f64,
    pub warning_memory_percent: f64,
    pub critical_memory_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            slow_latency_ms: 1500,
            slow_error_latency_ms: 3000,
            warning_error_rate_percent: 5.0,
            critical_error_rate_percent: 10.0,
            warning_memory_percent: 75.0,
            critical_memory_percent: 90.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub page_timeout_secs: u64,
    pub server_timeout_secs: u64,
    /// Cap on in-flight probes within one run.
    pub max_concurrent_probes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            page_timeout_secs: 5,
            server_timeout_secs: 3,
            max_concurrent_probes: 50,
        }
    }
}

impl ProbeConfig {
    pub fn timeout_for(&self, kind: MonitorKind) -> Duration {
        match kind {
            MonitorKind::Page => Duration::from_secs(self.page_timeout_secs),
            MonitorKind::Server => Duration::from_secs(self.server_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub health_check_interval_secs: u64,
    /// Delay before the immediate first run after process start.
    pub startup_delay_secs: u64,
    /// Local hour (0-23) at which the daily summary report is sent.
    pub report_hour: u32,
    /// Local hour (0-23) at which retention cleanup runs.
    pub cleanup_hour: u32,
    /// How long shutdown waits for an in-flight run to finish.
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 300,
            startup_delay_secs: 5,
            report_hour: 8,
            cleanup_hour: 3,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub snapshot_retention_days: i64,
    pub error_log_retention_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            snapshot_retention_days: 7,
            error_log_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Additional delivery attempts after the first failure.
    pub max_retries: u32,
    /// Base delay; attempt N waits `retry_delay_ms * N` before retrying.
    pub retry_delay_ms: u64,
    /// Which severity transitions re-trigger notification on an already-open
    /// incident: "escalation" (strict increase), "always", or "never".
    pub renotify_policy: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            renotify_policy: "escalation".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
}

/// A monitor seeded from the config file. Registration through an admin
/// surface is out of scope here; seeding covers standalone deployments.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSeed {
    pub url: String,
    pub name: String,
    pub kind: MonitorKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientConfig {
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub thresholds: Thresholds,
    pub probe: ProbeConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub dispatch: DispatchConfig,
    pub smtp: SmtpConfig,
    pub sms: SmsConfig,
    pub webhook: WebhookConfig,
    pub monitors: Vec<MonitorSeed>,
    pub recipients: Vec<RecipientConfig>,
}

/// Environment layer. These override the file for the operator-facing knobs:
/// SMTP credentials, webhook URL, SMS provider, and alert thresholds.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    smtp_from: Option<String>,
    webhook_url: Option<String>,
    sms_api_url: Option<String>,
    sms_api_token: Option<String>,
    slow_latency_ms: Option<u64>,
    slow_error_latency_ms: Option<u64>,
    warning_error_rate_percent: Option<f64>,
    critical_error_rate_percent: Option<f64>,
    warning_memory_percent: Option<f64>,
    critical_memory_percent: Option<f64>,
}

impl AppConfig {
    /// Loads configuration: optional TOML file, then environment overrides,
    /// then validation. Fails fast on invalid values rather than silently
    /// defaulting mid-run.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config: AppConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
                    path: path_str.to_string(),
                    source: e,
                })?;
                toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                    path: path_str.to_string(),
                    source: e,
                })?
            } else {
                AppConfig::default()
            }
        } else {
            AppConfig::default()
        };

        let env: EnvOverrides = envy::from_env()?;
        if let Some(v) = env.smtp_host {
            config.smtp.host = v;
        }
        if let Some(v) = env.smtp_port {
            config.smtp.port = v;
        }
        if let Some(v) = env.smtp_username {
            config.smtp.username = v;
        }
        if let Some(v) = env.smtp_password {
            config.smtp.password = v;
        }
        if let Some(v) = env.smtp_from {
            config.smtp.from = v;
        }
        if let Some(v) = env.webhook_url {
            config.webhook.url = v;
        }
        if let Some(v) = env.sms_api_url {
            config.sms.api_url = v;
        }
        if let Some(v) = env.sms_api_token {
            config.sms.api_token = v;
        }
        if let Some(v) = env.slow_latency_ms {
            config.thresholds.slow_latency_ms = v;
        }
        if let Some(v) = env.slow_error_latency_ms {
            config.thresholds.slow_error_latency_ms = v;
        }
        if let Some(v) = env.warning_error_rate_percent {
            config.thresholds.warning_error_rate_percent = v;
        }
        if let Some(v) = env.critical_error_rate_percent {
            config.thresholds.critical_error_rate_percent = v;
        }
        if let Some(v) = env.warning_memory_percent {
            config.thresholds.warning_memory_percent = v;
        }
        if let Some(v) = env.critical_memory_percent {
            config.thresholds.critical_memory_percent = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        if t.warning_error_rate_percent >= t.critical_error_rate_percent {
            return Err(ConfigError::Invalid(format!(
                "warning error rate ({}) must be below critical error rate ({})",
                t.warning_error_rate_percent, t.critical_error_rate_percent
            )));
        }
        if t.warning_memory_percent >= t.critical_memory_percent {
            return Err(ConfigError::Invalid(format!(
                "warning memory threshold ({}) must be below critical memory threshold ({})",
                t.warning_memory_percent, t.critical_memory_percent
            )));
        }
        if self.probe.max_concurrent_probes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_probes must be at least 1".to_string(),
            ));
        }
        if self.scheduler.report_hour > 23 || self.scheduler.cleanup_hour > 23 {
            return Err(ConfigError::Invalid(
                "report_hour and cleanup_hour must be in 0..=23".to_string(),
            ));
        }
        if self.retention.snapshot_retention_days <= 0 || self.retention.error_log_retention_days <= 0
        {
            return Err(ConfigError::Invalid(
                "retention windows must be positive".to_string(),
            ));
        }
        match self.dispatch.renotify_policy.as_str() {
            "escalation" | "always" | "never" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown renotify_policy '{other}' (expected escalation, always, or never)"
                )));
            }
        }
        if self.webhook.enabled && self.webhook.url.is_empty() {
            return Err(ConfigError::Invalid(
                "webhook channel is enabled but webhook.url is empty".to_string(),
            ));
        }
        if self.smtp.enabled && (self.smtp.host.is_empty() || self.smtp.from.is_empty()) {
            return Err(ConfigError::Invalid(
                "email channel is enabled but smtp.host or smtp.from is empty".to_string(),
            ));
        }
        if self.sms.enabled && self.sms.api_url.is_empty() {
            return Err(ConfigError::Invalid(
                "sms channel is enabled but sms.api_url is empty".to_string(),
            ));
        }
        Ok(())
    }
}
