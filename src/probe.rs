//! Single bounded-time health checks against monitored targets.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::models::Observation;

/// Issues probe requests. One shared client; timeouts are enforced per probe
/// via cancellation so a hung connection is abandoned deterministically.
pub struct Prober {
    client: reqwest::Client,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self {
            // No client-wide timeout; each probe wraps its request future in
            // tokio::time::timeout with the caller's bound.
            client: reqwest::Client::new(),
        }
    }

    /// Performs a single GET against `url`, measuring wall-clock latency.
    ///
    /// Network errors, non-success statuses, and timeouts are all surfaced in
    /// the returned `Observation`; this never fails in a way that aborts the
    /// run.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Observation {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.client.get(url).send()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(response)) => {
                let status_code = response.status().as_u16();
                debug!(url, status_code, latency_ms, "Probe completed.");
                Observation {
                    ok: true,
                    status_code: Some(status_code),
                    latency_ms,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                let error = if e.is_timeout() {
                    "timeout".to_string()
                } else if e.is_connect() {
                    format!("connect error: {e}")
                } else {
                    format!("request error: {e}")
                };
                debug!(url, latency_ms, error = %error, "Probe failed.");
                Observation {
                    ok: false,
                    status_code: None,
                    latency_ms,
                    error: Some(error),
                }
            }
            Err(_elapsed) => {
                debug!(url, timeout_ms = timeout.as_millis() as u64, "Probe timed out.");
                Observation {
                    ok: false,
                    status_code: None,
                    latency_ms,
                    error: Some("timeout".to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_probe_reports_status_and_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let prober = Prober::new();
        let obs = prober.probe(&server.uri(), Duration::from_secs(5)).await;
        assert!(obs.ok);
        assert_eq!(obs.status_code, Some(200));
        assert!(obs.error.is_none());
    }

    #[tokio::test]
    async fn http_error_status_is_still_a_completed_observation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let prober = Prober::new();
        let obs = prober.probe(&server.uri(), Duration::from_secs(5)).await;
        assert!(obs.ok);
        assert_eq!(obs.status_code, Some(503));
    }

    #[tokio::test]
    async fn hung_target_is_abandoned_at_the_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let prober = Prober::new();
        let started = Instant::now();
        let obs = prober.probe(&server.uri(), Duration::from_millis(200)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!obs.ok);
        assert_eq!(obs.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn unreachable_target_reports_connect_error() {
        let prober = Prober::new();
        // Reserved TEST-NET-1 address; nothing listens there.
        let obs = prober
            .probe("http://192.0.2.1:9/", Duration::from_millis(500))
            .await;
        assert!(!obs.ok);
        assert!(obs.error.is_some());
    }
}
