//! Command-line overrides.
//!
//! Parsed once at the binary edge and injected into the manager. Overrides
//! have the highest precedence: they win over persisted and resolved port
//! values, which makes operator and test setups deterministic.

use std::path::PathBuf;

/// Operator/test overrides for the supervisor.
#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    /// Overrides the CDP bridge port.
    pub cdp_port: Option<u16>,

    /// Overrides the stable MCP proxy port.
    pub mcp_port: Option<u16>,

    /// Overrides the agent endpoint port.
    pub agent_port: Option<u16>,

    /// Overrides the extension endpoint port.
    pub extension_port: Option<u16>,

    /// Overrides the server resources directory.
    pub resources_dir: Option<PathBuf>,

    /// Disables launching the server entirely. Prefs still load, migrate,
    /// and save so upgrades complete even on disabled profiles.
    pub disable_server: bool,

    /// Disables consulting the updater for binary/resources paths.
    pub disable_updater: bool,
}

impl ServerOverrides {
    pub fn none() -> Self {
        Self::default()
    }
}
