//! Port model and OS port allocation.

use bos_common::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::net::TcpListener;

/// Default CDP bridge port when no prior assignment exists.
pub const DEFAULT_CDP_PORT: u16 = 9222;

/// Default stable MCP proxy port when no prior assignment exists.
pub const DEFAULT_PROXY_PORT: u16 = 9100;

/// The full port set the supervisor manages.
///
/// `proxy` and `cdp` are the only ports stable clients ever see. `server`
/// and `extension` are ephemeral backend ports reassigned on every
/// (re)launch. `agent` is resolved at startup and kept for the manager's
/// lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPorts {
    pub cdp: u16,
    pub proxy: u16,
    pub server: u16,
    pub extension: u16,
    pub agent: u16,
}

/// Ask the OS for a free ephemeral port.
///
/// Binds to port 0 on the loopback interface and reads back the assigned
/// port. The listener is dropped immediately; the small reuse window before
/// the backend binds is acceptable for a local sidecar.
pub fn find_available_port() -> ServerResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| ServerError::port_resolution(format!("bind failed: {}", e)))?;

    let port = listener
        .local_addr()
        .map_err(|e| ServerError::port_resolution(format!("local_addr failed: {}", e)))?
        .port();

    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_available_port_is_bindable() {
        let port = find_available_port().unwrap();
        assert_ne!(port, 0);
        // The returned port must be immediately bindable.
        let listener = TcpListener::bind(("127.0.0.1", port));
        assert!(listener.is_ok());
    }

    #[test]
    fn test_allocation_avoids_bound_ports() {
        let port = find_available_port().unwrap();
        // Keep the first port occupied; a second allocation must not hand
        // out the same port while it is bound.
        let _held = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let other = find_available_port().unwrap();
        assert_ne!(port, other);
    }

    #[test]
    fn test_ports_default_is_all_zero() {
        let ports = ServerPorts::default();
        assert_eq!(ports.cdp, 0);
        assert_eq!(ports.proxy, 0);
        assert_eq!(ports.server, 0);
        assert_eq!(ports.extension, 0);
        assert_eq!(ports.agent, 0);
    }
}
