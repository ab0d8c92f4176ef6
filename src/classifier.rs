//! Pure status classification. Total over all observations; never fails.

use crate::config::Thresholds;
use crate::models::{MonitorStatus, Observation, SystemStatus};

/// Classifies a page probe observation.
///
/// `Down` when the probe errored out entirely or the server answered 5xx.
/// `Slow` for client-error responses or latency above the configured
/// threshold. `Up` otherwise.
pub fn classify_page(obs: &Observation, thresholds: &Thresholds) -> MonitorStatus {
    if !obs.ok {
        return MonitorStatus::Down;
    }
    match obs.status_code {
        Some(code) if code >= 500 => MonitorStatus::Down,
        Some(code) if (400..500).contains(&code) => MonitorStatus::Slow,
        _ => {
            let limit = if obs.error.is_some() {
                thresholds.slow_error_latency_ms
            } else {
                thresholds.slow_latency_ms
            };
            if obs.latency_ms > limit {
                MonitorStatus::Slow
            } else {
                MonitorStatus::Up
            }
        }
    }
}

/// Classifies a server probe observation: `Offline` on probe error or 5xx,
/// `Online` otherwise.
pub fn classify_server(obs: &Observation) -> MonitorStatus {
    if !obs.ok {
        return MonitorStatus::Offline;
    }
    match obs.status_code {
        Some(code) if code >= 500 => MonitorStatus::Offline,
        _ => MonitorStatus::Online,
    }
}

/// Classifies overall system health from the aggregated metrics. The error
/// rate dominates: a critical error rate is critical regardless of memory.
pub fn classify_system(
    error_rate_percent: f64,
    memory_usage_percent: f64,
    thresholds: &Thresholds,
) -> SystemStatus {
    if error_rate_percent > thresholds.critical_error_rate_percent
        || memory_usage_percent > thresholds.critical_memory_percent
    {
        SystemStatus::Critical
    } else if error_rate_percent > thresholds.warning_error_rate_percent
        || memory_usage_percent > thresholds.warning_memory_percent
    {
        SystemStatus::Warning
    } else {
        SystemStatus::Healthy
    }
}
