//! # BOS Server
//!
//! Lifecycle supervisor for the BrowserOS sidecar server process.
//!
//! The supervisor owns port allocation and persistence, process
//! launch/termination, health monitoring with auto-restart, orphan-process
//! recovery across host restarts, and coordinated restarts for binary
//! updates. External tool clients connect through two stable ports (the MCP
//! proxy and the CDP bridge) that never change while the backend restarts
//! behind them.
//!
//! The entry point is [`ServerManager`], a cloneable handle over a
//! single-task actor. All collaborators ([`ProcessController`],
//! [`ServerStateStore`], [`HealthChecker`](bos_monitoring::HealthChecker),
//! [`ServerUpdater`], [`ServerProxy`], [`PrefStore`]) are injectable for
//! testing; production wiring lives in [`ServerManagerDeps::production`].

pub mod instance;
pub mod lock;
pub mod manager;
pub mod overrides;
pub mod ports;
pub mod prefs;
pub mod process_controller;
pub mod proxy;
pub mod state_store;
pub mod updater;

pub use lock::InstanceLock;
pub use manager::{ServerManager, ServerManagerDeps};
pub use overrides::ServerOverrides;
pub use ports::{find_available_port, ServerPorts};
pub use prefs::{register_server_prefs, LocalPrefStore, PrefStore, SubscriptionId};
pub use process_controller::{
    DefaultProcessController, LaunchResult, ProcessController, ServerLaunchConfig, ServerProcess,
};
pub use proxy::{ServerProxy, TcpServerProxy};
pub use state_store::{FileServerStateStore, ServerState, ServerStateStore};
pub use updater::{DirServerUpdater, ServerUpdater};
