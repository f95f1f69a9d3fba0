//! Public handle for the server manager.
//!
//! A lightweight clone-able handle; all methods send commands to the actor
//! and await the response. Accessors degrade to zero/false defaults when the
//! actor is unavailable rather than surfacing channel errors to the host.

use super::commands::ManagerCommand;
use crate::overrides::ServerOverrides;
use crate::ports::ServerPorts;
use crate::prefs::{register_server_prefs, LocalPrefStore, PrefStore};
use crate::process_controller::{DefaultProcessController, ProcessController};
use crate::proxy::{ServerProxy, TcpServerProxy};
use crate::state_store::{FileServerStateStore, ServerStateStore};
use crate::updater::{production_updater, ServerUpdater};
use bos_monitoring::{HealthChecker, HttpHealthChecker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Injected collaborators and configuration for a manager instance.
///
/// Everything is swappable for tests; `production` wires the defaults.
pub struct ServerManagerDeps {
    pub process_controller: Arc<dyn ProcessController>,
    pub state_store: Arc<dyn ServerStateStore>,
    pub health_checker: Arc<dyn HealthChecker>,
    /// Absent updater degrades to the bundled binary only.
    pub updater: Option<Arc<dyn ServerUpdater>>,
    /// Absent preference store makes the manager inert.
    pub prefs: Option<Arc<dyn PrefStore>>,
    pub proxy: Box<dyn ServerProxy>,
    pub cdp_bridge: Box<dyn ServerProxy>,
    pub overrides: ServerOverrides,
    /// Directory holding the lock file and persisted records.
    pub state_dir: PathBuf,
    /// Directory holding the bundled server binary and resources.
    pub bundled_dir: PathBuf,
}

impl ServerManagerDeps {
    /// Production wiring: file-backed prefs and state, real process control,
    /// HTTP health probing, directory-based updater, TCP forwarders.
    pub fn production(
        install_dir: &Path,
        data_dir: &Path,
        overrides: ServerOverrides,
    ) -> Self {
        let prefs = {
            let store = LocalPrefStore::new(data_dir.join("local_state.json"));
            register_server_prefs(&store);
            Arc::new(store)
        };

        let updater: Option<Arc<dyn ServerUpdater>> = if overrides.disable_updater {
            None
        } else {
            Some(Arc::new(production_updater(install_dir, data_dir)))
        };

        Self {
            process_controller: Arc::new(DefaultProcessController::new()),
            state_store: Arc::new(FileServerStateStore::new(
                data_dir.join("server_state.json"),
            )),
            health_checker: Arc::new(HttpHealthChecker::default()),
            updater,
            prefs: Some(prefs),
            proxy: Box::new(TcpServerProxy::new()),
            cdp_bridge: Box::new(TcpServerProxy::new()),
            overrides,
            state_dir: data_dir.to_path_buf(),
            bundled_dir: install_dir.to_path_buf(),
        }
    }
}

/// Handle to the server manager actor.
#[derive(Clone)]
pub struct ServerManager {
    pub(super) cmd_tx: mpsc::Sender<ManagerCommand>,
}

impl ServerManager {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
        fallback: T,
    ) -> T {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(make(tx)).await.is_err() {
            return fallback;
        }
        rx.await.unwrap_or(fallback)
    }

    /// Start the supervisor: acquire the instance lock, recover any orphaned
    /// prior process, resolve and persist ports, bind the stable-port
    /// services, and launch the backend.
    ///
    /// Completes when the start sequencing has finished; lock contention and
    /// launch failures are handled internally (they are designed modes, not
    /// caller-visible errors).
    pub async fn start(&self) {
        self.request(|resp| ManagerCommand::Start { resp }, ()).await
    }

    /// Stop the supervisor: terminate the backend (graceful first), delete
    /// the state record, tear down timers and stable services, release the
    /// lock. Idempotent.
    pub async fn stop(&self) {
        self.request(|resp| ManagerCommand::Stop { resp }, ()).await
    }

    /// Stop and additionally terminate the actor. All outstanding deferred
    /// work is invalidated; no callback runs after this returns.
    pub async fn shutdown(&self) {
        self.request(|resp| ManagerCommand::Shutdown { resp }, ())
            .await
    }

    pub async fn is_running(&self) -> bool {
        self.request(|resp| ManagerCommand::IsRunning { resp }, false)
            .await
    }

    /// The full current port set (all zeros before `start`).
    pub async fn ports(&self) -> ServerPorts {
        self.request(
            |resp| ManagerCommand::GetPorts { resp },
            ServerPorts::default(),
        )
        .await
    }

    /// Stable CDP bridge port. Never changes across backend restarts.
    pub async fn cdp_port(&self) -> u16 {
        self.ports().await.cdp
    }

    /// Stable MCP proxy port. Never changes across backend restarts.
    pub async fn proxy_port(&self) -> u16 {
        self.ports().await.proxy
    }

    /// What external MCP clients connect to (alias for the proxy port).
    pub async fn mcp_port(&self) -> u16 {
        self.proxy_port().await
    }

    /// Ephemeral backend server port; may change on every restart.
    pub async fn server_port(&self) -> u16 {
        self.ports().await.server
    }

    /// Ephemeral extension endpoint port; may change on every restart.
    pub async fn extension_port(&self) -> u16 {
        self.ports().await.extension
    }

    pub async fn agent_port(&self) -> u16 {
        self.ports().await.agent
    }

    pub async fn is_allow_remote_in_mcp(&self) -> bool {
        self.request(|resp| ManagerCommand::IsAllowRemoteInMcp { resp }, false)
            .await
    }

    /// Restart the backend to pick up an updated binary, keeping the stable
    /// ports unchanged. Resolves `true` once the relaunch succeeded.
    ///
    /// Single-flight: when a restart or update is already in progress the
    /// call resolves `false` immediately without queueing.
    pub async fn restart_server_for_update(&self) -> bool {
        self.request(|resp| ManagerCommand::RestartForUpdate { resp }, false)
            .await
    }

    /// Path of the server binary the next launch would use.
    pub async fn server_executable_path(&self) -> PathBuf {
        self.request(
            |resp| ManagerCommand::GetExecutablePath { resp },
            PathBuf::new(),
        )
        .await
    }

    /// Path of the resources directory the next launch would use.
    pub async fn server_resources_path(&self) -> PathBuf {
        self.request(
            |resp| ManagerCommand::GetResourcesPath { resp },
            PathBuf::new(),
        )
        .await
    }

    /// Test-only: force the running flag without launching anything.
    #[cfg(test)]
    pub(crate) async fn test_set_running(&self, running: bool) {
        self.request(
            |resp| ManagerCommand::TestSetRunning { running, resp },
            (),
        )
        .await
    }

    /// Test-only: inject a health-check result as if the probe completed.
    #[cfg(test)]
    pub(crate) async fn test_health_check_complete(&self, success: bool) {
        self.request(
            |resp| ManagerCommand::TestHealthCheckComplete { success, resp },
            (),
        )
        .await
    }

    /// Test-only: inject an unexpected process exit.
    #[cfg(test)]
    pub(crate) async fn test_process_exited(&self, exit_code: i32) {
        self.request(
            |resp| ManagerCommand::TestProcessExited { exit_code, resp },
            (),
        )
        .await
    }
}
