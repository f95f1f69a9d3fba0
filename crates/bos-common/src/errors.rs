//! Error types for the BrowserOS server supervisor.

use thiserror::Error;

/// Result type alias for supervisor operations.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Error type shared by the supervisor crates.
///
/// The supervisor manages a single child process, so variants name the
/// failing operation rather than carrying a process identifier.
#[derive(Debug, Error, Clone)]
pub enum ServerError {
    /// The server binary could not be spawned.
    #[error("Server spawn failed: {reason}")]
    SpawnFailed { reason: String },

    /// The server process could not be terminated.
    #[error("Server stop failed: {reason}")]
    StopFailed { reason: String },

    /// An operation did not complete within its deadline.
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Invalid or unreadable configuration / persisted state.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// The OS could not provide a usable port.
    #[error("Port resolution failed: {reason}")]
    PortResolution { reason: String },

    /// A stable-port service (proxy, CDP bridge) failed.
    #[error("Proxy error: {reason}")]
    Proxy { reason: String },

    /// I/O error with the failed operation named.
    #[error("I/O error during {operation}: {reason}")]
    Io { operation: String, reason: String },
}

impl ServerError {
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    pub fn stop_failed(reason: impl Into<String>) -> Self {
        Self::StopFailed {
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn port_resolution(reason: impl Into<String>) -> Self {
        Self::PortResolution {
            reason: reason.into(),
        }
    }

    pub fn proxy(reason: impl Into<String>) -> Self {
        Self::Proxy {
            reason: reason.into(),
        }
    }

    pub fn io(operation: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let err = ServerError::spawn_failed("binary missing");
        assert!(matches!(err, ServerError::SpawnFailed { .. }));
        assert_eq!(err.to_string(), "Server spawn failed: binary missing");

        let err = ServerError::timeout("wait_for_exit");
        assert!(err.to_string().contains("wait_for_exit"));
    }

    #[test]
    fn test_io_error_carries_operation() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = ServerError::io("read state file", &io);
        let message = err.to_string();
        assert!(message.contains("read state file"));
        assert!(message.contains("gone"));
    }
}
