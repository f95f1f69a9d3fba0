//! # BOS Monitoring
//!
//! Asynchronous liveness probing for the BrowserOS server supervisor.
//!
//! Provides the `HealthChecker` seam between the supervisor (which decides
//! whether to restart) and the probe transport (HTTP against the backend's
//! `/health` endpoint), plus the best-effort HTTP terminate request used
//! during graceful restarts.

pub mod http;

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Result of a single liveness probe.
#[derive(Debug, Clone)]
pub struct HealthCheckData {
    pub is_healthy: bool,
    pub checked_at: chrono::DateTime<chrono::Utc>,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
}

/// Asynchronous liveness probe against a backend port.
///
/// One invocation performs exactly one probe; scheduling and failure
/// accounting belong to the caller.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check_health(&self, port: u16) -> bool;
}

/// Default checker: HTTP GET against `http://127.0.0.1:{port}/health`.
pub struct HttpHealthChecker {
    timeout: Duration,
}

impl HttpHealthChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpHealthChecker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check_health(&self, port: u16) -> bool {
        let endpoint = format!("http://127.0.0.1:{}/health", port);
        match http::check_http_health(&endpoint, self.timeout).await {
            Ok(data) => data.is_healthy,
            Err(e) => {
                debug!("Health probe error for port {}: {}", port, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_port_is_unhealthy() {
        // Bind-then-drop to get a port nothing is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = HttpHealthChecker::new(Duration::from_millis(500));
        assert!(!checker.check_health(port).await);
    }
}
