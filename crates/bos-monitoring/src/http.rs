// HTTP probe and terminate-request transport.

use crate::HealthCheckData;
use chrono::Utc;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Perform an HTTP GET health check against `endpoint`.
///
/// Connection failures and timeouts are reported as an unhealthy result
/// rather than an error; `Err` is reserved for malformed input.
pub async fn check_http_health(
    endpoint: &str,
    check_timeout: Duration,
) -> Result<HealthCheckData, String> {
    let start_time = std::time::Instant::now();

    debug!("Starting HTTP health check: {}", endpoint);

    let uri: Uri = endpoint
        .parse()
        .map_err(|e| format!("Invalid URI {}: {}", endpoint, e))?;

    let client = Client::builder(TokioExecutor::new()).build_http();

    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("User-Agent", "BrowserOS-ServerSupervisor/1.0")
        .body(Empty::<Bytes>::new())
        .map_err(|e| format!("Failed to build request: {}", e))?;

    let response_result = timeout(check_timeout, client.request(request)).await;

    let response = match response_result {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            warn!("HTTP health check connection failed: {} - {}", endpoint, e);
            let elapsed = start_time.elapsed().as_millis() as u64;
            return Ok(HealthCheckData {
                is_healthy: false,
                checked_at: Utc::now(),
                response_time_ms: Some(elapsed),
                error_message: Some(format!("Connection failed: {}", e)),
            });
        }
        Err(_) => {
            warn!("HTTP health check timeout: {}", endpoint);
            return Ok(HealthCheckData {
                is_healthy: false,
                checked_at: Utc::now(),
                response_time_ms: Some(check_timeout.as_millis() as u64),
                error_message: Some("Timeout".to_string()),
            });
        }
    };

    let status = response.status();
    let elapsed = start_time.elapsed().as_millis() as u64;
    let is_healthy = status.is_success();

    debug!(
        "HTTP health check complete: {} - status={} healthy={} time={}ms",
        endpoint, status, is_healthy, elapsed
    );

    Ok(HealthCheckData {
        is_healthy,
        checked_at: Utc::now(),
        response_time_ms: Some(elapsed),
        error_message: if !is_healthy {
            Some(format!("Unexpected status code: {}", status))
        } else {
            None
        },
    })
}

/// Ask the backend to shut itself down via `POST /terminate`.
///
/// Best-effort: returns whether the request was delivered with a success
/// status. A dead or wedged backend must not stall the caller, so failures
/// and timeouts simply return false.
pub async fn send_terminate_request(port: u16, request_timeout: Duration) -> bool {
    let endpoint = format!("http://127.0.0.1:{}/terminate", port);

    let uri: Uri = match endpoint.parse() {
        Ok(uri) => uri,
        Err(e) => {
            warn!("Invalid terminate URI {}: {}", endpoint, e);
            return false;
        }
    };

    let client = Client::builder(TokioExecutor::new()).build_http();

    let request = match Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("User-Agent", "BrowserOS-ServerSupervisor/1.0")
        .body(Empty::<Bytes>::new())
    {
        Ok(req) => req,
        Err(e) => {
            warn!("Failed to build terminate request: {}", e);
            return false;
        }
    };

    match timeout(request_timeout, client.request(request)).await {
        Ok(Ok(resp)) => {
            let delivered = resp.status().is_success();
            debug!(
                "Terminate request to port {} returned status {}",
                port,
                resp.status()
            );
            delivered
        }
        Ok(Err(e)) => {
            debug!("Terminate request to port {} failed: {}", port, e);
            false
        }
        Err(_) => {
            debug!("Terminate request to port {} timed out", port);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_error() {
        let result = check_http_health("not a url", Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connection_refused_is_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let data = check_http_health(
            &format!("http://127.0.0.1:{}/health", port),
            Duration::from_millis(500),
        )
        .await
        .unwrap();
        assert!(!data.is_healthy);
        assert!(data.error_message.is_some());
    }

    #[tokio::test]
    async fn test_terminate_request_to_dead_port_is_false() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!send_terminate_request(port, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_health_check_against_live_server() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Minimal one-shot HTTP server.
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
                    .await;
            }
        });

        let data = check_http_health(
            &format!("http://127.0.0.1:{}/health", port),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert!(data.is_healthy);
    }
}
