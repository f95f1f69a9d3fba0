//! ServerManagerActor - internal actor that owns all supervisor state.
//!
//! Runs in a single task and processes handle commands, deferred-work
//! events, pref-change notifications, and the two monitoring timers. The
//! actor never blocks: process waits run on a blocking worker and HTTP
//! probes run as async tasks, each posting a generation-stamped event back.
//!
//! ## Init-path await allowance
//!
//! `handle_start` awaits bounded work (orphan termination, stable-service
//! binds). This is acceptable because start happens once and commands issued
//! meanwhile simply queue; steady-state handlers never await anything
//! slower than a channel send.

use super::commands::{ManagerCommand, ManagerEvent};
use super::handle::ServerManagerDeps;
use crate::lock::InstanceLock;
use crate::overrides::ServerOverrides;
use crate::ports::{find_available_port, ServerPorts, DEFAULT_CDP_PORT, DEFAULT_PROXY_PORT};
use crate::prefs::{
    PrefStore, SubscriptionId, AGENT_SERVER_PORT, ALLOW_REMOTE_IN_MCP, CDP_SERVER_PORT,
    DEPRECATED_MCP_SERVER_PORT, EXTENSION_SERVER_PORT, PROXY_PORT, RESTART_SERVER_REQUESTED,
    SERVER_PORT, SERVER_VERSION,
};
use crate::process_controller::{LaunchResult, ProcessController, ServerLaunchConfig, ServerProcess};
use crate::proxy::ServerProxy;
use crate::state_store::{ServerState, ServerStateStore};
use crate::updater::{ServerUpdater, RESOURCES_DIR_NAME, SERVER_BINARY_NAME};
use bos_common::{ServerError, ServerResult};
use bos_monitoring::HealthChecker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Interval between backend `/health` probes.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between OS-level process liveness checks.
const PROCESS_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Timeout for the best-effort HTTP terminate request.
const TERMINATE_HTTP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for a graceful exit before force-killing.
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait after a force-kill.
const FORCE_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded wait for a live orphaned process during startup recovery.
const ORPHAN_EXIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Base delay for the relaunch backoff.
const BACKOFF_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the relaunch backoff.
const BACKOFF_MAX_DELAY: Duration = Duration::from_secs(60);

/// Consecutive launch failures after which the supervisor logs at error
/// level (it keeps retrying at the capped delay).
const BACKOFF_ERROR_THRESHOLD: u32 = 5;

/// Lock file name under the state directory.
const LOCK_FILE_NAME: &str = "server.lock";

/// Relaunch delay after the n-th consecutive launch failure: doubles from
/// the base, capped.
pub(super) fn relaunch_backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(6);
    let delay = BACKOFF_BASE_DELAY * 2u32.pow(exp);
    delay.min(BACKOFF_MAX_DELAY)
}

pub(super) struct ServerManagerActor {
    process_controller: Arc<dyn ProcessController>,
    state_store: Arc<dyn ServerStateStore>,
    health_checker: Arc<dyn HealthChecker>,
    updater: Option<Arc<dyn ServerUpdater>>,
    prefs: Option<Arc<dyn PrefStore>>,
    proxy: Box<dyn ServerProxy>,
    cdp_bridge: Box<dyn ServerProxy>,
    overrides: ServerOverrides,
    state_dir: PathBuf,
    bundled_dir: PathBuf,

    lock: Option<InstanceLock>,
    process: Option<ServerProcess>,
    ports: ServerPorts,
    allow_remote_in_mcp: bool,

    /// Start sequencing completed and the lock is held.
    started: bool,
    /// Backend process is believed to be up.
    is_running: bool,
    is_restarting: bool,
    is_updating: bool,
    update_callback: Option<oneshot::Sender<bool>>,

    consecutive_startup_failures: u32,
    last_launch_time: Option<Instant>,

    /// Bumped by stop/shutdown; deferred events from an older generation
    /// are dropped without acting.
    generation: u64,

    pref_subscription: Option<SubscriptionId>,
    event_tx: mpsc::Sender<ManagerEvent>,
    pref_tx: mpsc::UnboundedSender<String>,
}

impl ServerManagerActor {
    pub(super) fn new(
        deps: ServerManagerDeps,
        event_tx: mpsc::Sender<ManagerEvent>,
        pref_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        ServerManagerActor {
            process_controller: deps.process_controller,
            state_store: deps.state_store,
            health_checker: deps.health_checker,
            updater: deps.updater,
            prefs: deps.prefs,
            proxy: deps.proxy,
            cdp_bridge: deps.cdp_bridge,
            overrides: deps.overrides,
            state_dir: deps.state_dir,
            bundled_dir: deps.bundled_dir,
            lock: None,
            process: None,
            ports: ServerPorts::default(),
            allow_remote_in_mcp: false,
            started: false,
            is_running: false,
            is_restarting: false,
            is_updating: false,
            update_callback: None,
            consecutive_startup_failures: 0,
            last_launch_time: None,
            generation: 0,
            pref_subscription: None,
            event_tx,
            pref_tx,
        }
    }

    /// Main event loop.
    pub(super) async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<ManagerCommand>,
        mut event_rx: mpsc::Receiver<ManagerEvent>,
        mut pref_rx: mpsc::UnboundedReceiver<String>,
    ) {
        let mut health_interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut process_interval = tokio::time::interval(PROCESS_CHECK_INTERVAL);
        process_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_cmd = cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => {
                            info!("All manager handles dropped; stopping supervisor");
                            self.stop_impl().await;
                            break;
                        }
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.handle_event(event);
                }
                Some(key) = pref_rx.recv() => {
                    self.handle_pref_change(&key);
                }
                _ = health_interval.tick() => {
                    self.schedule_health_check();
                }
                _ = process_interval.tick() => {
                    self.check_process_status();
                }
            }
        }

        info!("Server manager actor terminated");
    }

    /// Handle a command; returns true when the actor should terminate.
    async fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
        match cmd {
            ManagerCommand::Start { resp } => {
                self.handle_start().await;
                let _ = resp.send(());
            }
            ManagerCommand::Stop { resp } => {
                self.stop_impl().await;
                let _ = resp.send(());
            }
            ManagerCommand::Shutdown { resp } => {
                self.stop_impl().await;
                self.unsubscribe_prefs();
                let _ = resp.send(());
                return true;
            }
            ManagerCommand::IsRunning { resp } => {
                let _ = resp.send(self.is_running);
            }
            ManagerCommand::GetPorts { resp } => {
                let _ = resp.send(self.ports);
            }
            ManagerCommand::IsAllowRemoteInMcp { resp } => {
                let _ = resp.send(self.allow_remote_in_mcp);
            }
            ManagerCommand::RestartForUpdate { resp } => {
                self.handle_restart_for_update(resp);
            }
            ManagerCommand::GetExecutablePath { resp } => {
                let _ = resp.send(self.server_executable_path());
            }
            ManagerCommand::GetResourcesPath { resp } => {
                let _ = resp.send(self.server_resources_path());
            }

            #[cfg(test)]
            ManagerCommand::TestSetRunning { running, resp } => {
                self.started = true;
                self.is_running = running;
                let _ = resp.send(());
            }
            #[cfg(test)]
            ManagerCommand::TestHealthCheckComplete { success, resp } => {
                self.on_health_check_complete(success);
                let _ = resp.send(());
            }
            #[cfg(test)]
            ManagerCommand::TestProcessExited { exit_code, resp } => {
                self.on_process_exited(exit_code);
                let _ = resp.send(());
            }
        }
        false
    }

    fn handle_event(&mut self, event: ManagerEvent) {
        if event.generation() != self.generation {
            debug!("Dropping stale manager event: {:?}", event);
            return;
        }

        match event {
            ManagerEvent::HealthCheckComplete { success, .. } => {
                self.on_health_check_complete(success);
            }
            ManagerEvent::TerminateHttpComplete { .. } => {
                self.on_terminate_http_complete();
            }
            ManagerEvent::ProcessWaitComplete { exit_code, .. } => {
                self.continue_restart_after_wait(exit_code);
            }
            ManagerEvent::RetryLaunch { .. } => {
                self.on_retry_launch();
            }
        }
    }

    // -------------------------------------------------------------------
    // Start sequencing
    // -------------------------------------------------------------------

    async fn handle_start(&mut self) {
        if self.started {
            debug!("Start ignored: supervisor already started");
            return;
        }

        let Some(prefs) = self.prefs.clone() else {
            warn!("No preference store; server supervisor is inert");
            return;
        };

        if !self.acquire_lock() {
            return;
        }

        self.recover_from_orphan().await;

        self.load_ports_from_prefs(prefs.as_ref());
        if let Err(e) = self.resolve_ports_for_startup() {
            warn!("Failed to resolve server ports: {}", e);
            self.lock = None;
            return;
        }
        self.apply_command_line_overrides();
        self.save_ports_to_prefs();

        self.allow_remote_in_mcp = prefs.get_boolean(ALLOW_REMOTE_IN_MCP);
        self.subscribe_to_prefs(prefs.as_ref());

        self.started = true;

        if self.overrides.disable_server {
            info!("Server disabled by command line; skipping services and launch");
            return;
        }

        self.start_stable_services().await;
        self.launch_server_process();
    }

    fn acquire_lock(&mut self) -> bool {
        let lock_path = self.state_dir.join(LOCK_FILE_NAME);
        match InstanceLock::try_acquire(&lock_path) {
            Ok(Some(lock)) => {
                self.lock = Some(lock);
                true
            }
            Ok(None) => {
                // Designed mode: another browser process already supervises
                // the server. Defer to it.
                info!("Server instance lock held elsewhere; not starting");
                false
            }
            Err(e) => {
                warn!("Failed to acquire server instance lock: {}", e);
                false
            }
        }
    }

    /// Clean up after a supervisor that did not shut down cleanly.
    ///
    /// A recorded process that is still alive is terminated rather than
    /// adopted: its ephemeral ports cannot be confirmed, and supervising a
    /// child whose server port is unknown would make every health probe a
    /// guess.
    async fn recover_from_orphan(&mut self) {
        let Some(state) = self.state_store.read() else {
            return;
        };

        if bos_process::process_matches(state.pid, state.creation_time) {
            warn!(
                "Found live orphaned server process (pid {}); terminating",
                state.pid
            );
            let controller = Arc::clone(&self.process_controller);
            let (pid, creation_time) = (state.pid, state.creation_time);
            let cleanup = tokio::task::spawn_blocking(move || {
                let mut process = ServerProcess::from_pid(pid, creation_time);
                let _ = controller.terminate(&mut process, false);
                if controller
                    .wait_for_exit_with_timeout(&mut process, ORPHAN_EXIT_TIMEOUT)
                    .is_none()
                {
                    let _ = controller.terminate(&mut process, true);
                }
            })
            .await;
            if cleanup.is_err() {
                warn!("Orphan cleanup task failed");
            }
        } else {
            info!(
                "Stale server state record (pid {}); cleaning up",
                state.pid
            );
        }

        if let Err(e) = self.state_store.delete() {
            warn!("Failed to delete server state record: {}", e);
        }
    }

    fn load_ports_from_prefs(&mut self, prefs: &dyn PrefStore) {
        // One-time migration from the deprecated single MCP port pref.
        let legacy_mcp = prefs.get_integer(DEPRECATED_MCP_SERVER_PORT);
        if legacy_mcp != 0 && prefs.get_integer(PROXY_PORT) == 0 {
            info!("Migrating legacy MCP port {} to proxy port", legacy_mcp);
            prefs.set_integer(PROXY_PORT, legacy_mcp);
        }

        self.ports = ServerPorts {
            cdp: clamp_port(prefs.get_integer(CDP_SERVER_PORT)),
            proxy: clamp_port(prefs.get_integer(PROXY_PORT)),
            server: clamp_port(prefs.get_integer(SERVER_PORT)),
            extension: clamp_port(prefs.get_integer(EXTENSION_SERVER_PORT)),
            agent: clamp_port(prefs.get_integer(AGENT_SERVER_PORT)),
        };
    }

    fn resolve_ports_for_startup(&mut self) -> ServerResult<()> {
        if self.ports.cdp == 0 {
            self.ports.cdp = DEFAULT_CDP_PORT;
        }
        if self.ports.proxy == 0 {
            self.ports.proxy = DEFAULT_PROXY_PORT;
        }
        if self.ports.server == 0 {
            self.ports.server = find_available_port()?;
        }
        if self.ports.extension == 0 {
            self.ports.extension = find_available_port()?;
        }
        if self.ports.agent == 0 {
            self.ports.agent = find_available_port()?;
        }
        Ok(())
    }

    fn apply_command_line_overrides(&mut self) {
        if let Some(port) = self.overrides.cdp_port {
            self.ports.cdp = port;
        }
        if let Some(port) = self.overrides.mcp_port {
            self.ports.proxy = port;
        }
        if let Some(port) = self.overrides.agent_port {
            self.ports.agent = port;
        }
        if let Some(port) = self.overrides.extension_port {
            self.ports.extension = port;
        }
    }

    fn save_ports_to_prefs(&self) {
        let Some(prefs) = &self.prefs else {
            return;
        };
        prefs.set_integer(CDP_SERVER_PORT, self.ports.cdp as i32);
        prefs.set_integer(PROXY_PORT, self.ports.proxy as i32);
        prefs.set_integer(SERVER_PORT, self.ports.server as i32);
        prefs.set_integer(EXTENSION_SERVER_PORT, self.ports.extension as i32);
        prefs.set_integer(AGENT_SERVER_PORT, self.ports.agent as i32);
    }

    fn subscribe_to_prefs(&mut self, prefs: &dyn PrefStore) {
        // A stop/start cycle must not stack subscriptions.
        if self.pref_subscription.is_some() {
            return;
        }
        let id = prefs.subscribe(
            &[ALLOW_REMOTE_IN_MCP, RESTART_SERVER_REQUESTED],
            self.pref_tx.clone(),
        );
        self.pref_subscription = Some(id);
    }

    fn unsubscribe_prefs(&mut self) {
        if let (Some(prefs), Some(id)) = (&self.prefs, self.pref_subscription.take()) {
            prefs.unsubscribe(id);
        }
    }

    /// Bind the stable-port services before the backend exists, so external
    /// clients always find a listener on the proxy and CDP ports.
    async fn start_stable_services(&mut self) {
        if let Err(e) = self
            .cdp_bridge
            .start(self.ports.cdp, self.ports.agent, false)
            .await
        {
            warn!("Failed to start CDP bridge on port {}: {}", self.ports.cdp, e);
        }
        if let Err(e) = self
            .proxy
            .start(self.ports.proxy, self.ports.server, self.allow_remote_in_mcp)
            .await
        {
            warn!(
                "Failed to start MCP proxy on port {}: {}",
                self.ports.proxy, e
            );
        }
    }

    // -------------------------------------------------------------------
    // Launch
    // -------------------------------------------------------------------

    fn bundled_binary_path(&self) -> PathBuf {
        self.bundled_dir.join(SERVER_BINARY_NAME)
    }

    pub(super) fn server_executable_path(&self) -> PathBuf {
        match (&self.updater, self.overrides.disable_updater) {
            (Some(updater), false) => updater.best_server_binary_path(),
            _ => self.bundled_binary_path(),
        }
    }

    pub(super) fn server_resources_path(&self) -> PathBuf {
        if let Some(dir) = &self.overrides.resources_dir {
            return dir.clone();
        }
        match (&self.updater, self.overrides.disable_updater) {
            (Some(updater), false) => updater.best_server_resources_path(),
            _ => self.bundled_dir.join(RESOURCES_DIR_NAME),
        }
    }

    fn build_launch_config(&self) -> ServerLaunchConfig {
        let executable = self.server_executable_path();
        let bundled = self.bundled_binary_path();
        let fallback_executable = if executable != bundled {
            Some(bundled)
        } else {
            None
        };

        ServerLaunchConfig {
            executable,
            fallback_executable,
            resources_dir: self.server_resources_path(),
            ports: self.ports,
            allow_remote: self.allow_remote_in_mcp,
            extra_args: Vec::new(),
        }
    }

    fn launch_server_process(&mut self) {
        let config = self.build_launch_config();
        debug!("Launching server: {}", config.executable.display());
        match self.process_controller.launch(&config) {
            Ok(result) => self.on_process_launched(result),
            Err(e) => self.on_launch_failed(e),
        }
    }

    fn on_process_launched(&mut self, result: LaunchResult) {
        if result.used_fallback {
            warn!("Server launched with bundled fallback binary");
            // The downloaded binary failed to start; do not retry it blindly.
            if let Some(updater) = &self.updater {
                updater.invalidate_downloaded_version();
            }
        }

        let process = result.process;
        info!("Server process launched (pid {})", process.pid);

        if let Err(e) = self.state_store.write(&ServerState {
            pid: process.pid,
            creation_time: process.creation_time,
        }) {
            warn!("Failed to write server state record: {}", e);
        }

        if !result.used_fallback {
            if let (Some(prefs), Some(updater)) = (&self.prefs, &self.updater) {
                if let Some(version) = updater.best_server_version() {
                    prefs.set_string(SERVER_VERSION, &version);
                }
            }
        }

        self.process = Some(process);
        self.last_launch_time = Some(Instant::now());
        self.consecutive_startup_failures = 0;
        self.is_running = true;

        // Persisted ports must match in-memory ports before anyone can
        // observe this (re)start as complete.
        self.save_ports_to_prefs();
        self.proxy.set_backend_port(self.ports.server);

        self.finish_restart(true);
    }

    fn on_launch_failed(&mut self, err: ServerError) {
        self.consecutive_startup_failures += 1;
        let failures = self.consecutive_startup_failures;
        self.process = None;
        self.is_running = false;
        self.finish_restart(false);

        let delay = relaunch_backoff(failures);
        if failures >= BACKOFF_ERROR_THRESHOLD {
            error!(
                "Server launch failed {} times in a row ({}); next attempt in {:?}",
                failures, err, delay
            );
        } else {
            warn!("Server launch failed ({}); retrying in {:?}", err, delay);
        }

        let events = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ManagerEvent::RetryLaunch { generation }).await;
        });
    }

    fn on_retry_launch(&mut self) {
        if !self.started || self.is_running || self.is_restarting || self.is_updating {
            return;
        }
        if self.overrides.disable_server {
            return;
        }
        if let Err(e) = self.reresolve_ephemeral_ports() {
            self.on_launch_failed(e);
            return;
        }
        self.launch_server_process();
    }

    fn reresolve_ephemeral_ports(&mut self) -> ServerResult<()> {
        self.ports.server = find_available_port()?;
        self.ports.extension = find_available_port()?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Health / liveness monitoring
    // -------------------------------------------------------------------

    fn schedule_health_check(&mut self) {
        if !self.is_running || self.is_restarting || self.is_updating {
            return;
        }

        let checker = Arc::clone(&self.health_checker);
        let port = self.ports.server;
        let events = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let success = checker.check_health(port).await;
            let _ = events
                .send(ManagerEvent::HealthCheckComplete {
                    generation,
                    success,
                })
                .await;
        });
    }

    fn on_health_check_complete(&mut self, success: bool) {
        // Single-flight: redundant failure notifications while a restart is
        // already in progress are ignored.
        if self.is_restarting || self.is_updating {
            debug!("Ignoring health result while restart in progress");
            return;
        }
        if !self.is_running {
            return;
        }

        if success {
            self.consecutive_startup_failures = 0;
            return;
        }

        warn!("Server health check failed; restarting");
        self.begin_restart(false, None);
    }

    fn check_process_status(&mut self) {
        if !self.is_running || self.is_restarting || self.is_updating {
            return;
        }
        let Some(process) = self.process.as_mut() else {
            return;
        };
        if process.is_alive() {
            return;
        }
        let exit_code = process.try_exit_code().unwrap_or(-1);
        self.on_process_exited(exit_code);
    }

    fn on_process_exited(&mut self, exit_code: i32) {
        if !self.is_running || self.is_restarting || self.is_updating {
            return;
        }
        let uptime = self.last_launch_time.map(|t| t.elapsed());
        warn!(
            "Server process exited unexpectedly (exit code {}, uptime {:?}); restarting",
            exit_code, uptime
        );
        self.begin_restart(false, None);
    }

    // -------------------------------------------------------------------
    // Restart sub-flow
    // -------------------------------------------------------------------

    fn handle_restart_for_update(&mut self, resp: oneshot::Sender<bool>) {
        if self.is_restarting || self.is_updating {
            // Single-flight: reject immediately, never queue.
            info!("Restart for update rejected: restart already in progress");
            let _ = resp.send(false);
            return;
        }
        if !self.started || self.overrides.disable_server {
            let _ = resp.send(false);
            return;
        }

        self.begin_restart(true, Some(resp));
    }

    fn begin_restart(&mut self, for_update: bool, callback: Option<oneshot::Sender<bool>>) {
        self.is_restarting = true;
        self.is_updating = for_update;
        self.update_callback = callback;
        info!("Restarting server (update: {})", for_update);

        if self.process.is_none() {
            self.continue_restart_after_wait(None);
            return;
        }

        let port = self.ports.server;
        let events = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            // Best-effort: a dead or wedged backend must not block the
            // restart, so the continuation runs either way.
            let _ = bos_monitoring::http::send_terminate_request(port, TERMINATE_HTTP_TIMEOUT).await;
            let _ = events
                .send(ManagerEvent::TerminateHttpComplete { generation })
                .await;
        });
    }

    fn on_terminate_http_complete(&mut self) {
        if !self.is_restarting && !self.is_updating {
            return;
        }

        let Some(process) = self.process.take() else {
            self.continue_restart_after_wait(None);
            return;
        };
        self.is_running = false;

        let controller = Arc::clone(&self.process_controller);
        let events = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let exit_code = tokio::task::spawn_blocking(move || {
                let mut process = process;
                match controller.wait_for_exit_with_timeout(&mut process, GRACEFUL_EXIT_TIMEOUT) {
                    Some(code) => Some(code),
                    None => {
                        let _ = controller.terminate(&mut process, true);
                        controller.wait_for_exit_with_timeout(&mut process, FORCE_EXIT_TIMEOUT)
                    }
                }
            })
            .await
            .ok()
            .flatten();

            let _ = events
                .send(ManagerEvent::ProcessWaitComplete {
                    generation,
                    exit_code,
                })
                .await;
        });
    }

    fn continue_restart_after_wait(&mut self, exit_code: Option<i32>) {
        if !self.is_restarting && !self.is_updating {
            return;
        }
        if let Some(code) = exit_code {
            debug!("Previous server process exited with code {}", code);
        }
        self.process = None;
        self.is_running = false;

        // Only the ephemeral backend ports move; proxy and CDP stay put.
        if let Err(e) = self.reresolve_ephemeral_ports() {
            self.on_launch_failed(e);
            return;
        }
        self.launch_server_process();
    }

    fn finish_restart(&mut self, success: bool) {
        self.is_restarting = false;
        self.is_updating = false;
        if let Some(callback) = self.update_callback.take() {
            let _ = callback.send(success);
        }
    }

    // -------------------------------------------------------------------
    // Pref reactions
    // -------------------------------------------------------------------

    fn handle_pref_change(&mut self, key: &str) {
        match key {
            ALLOW_REMOTE_IN_MCP => {
                if let Some(prefs) = &self.prefs {
                    self.allow_remote_in_mcp = prefs.get_boolean(ALLOW_REMOTE_IN_MCP);
                    info!(
                        "allow_remote_in_mcp changed to {}; applies at next launch",
                        self.allow_remote_in_mcp
                    );
                }
            }
            RESTART_SERVER_REQUESTED => {
                let Some(prefs) = self.prefs.clone() else {
                    return;
                };
                if !prefs.get_boolean(RESTART_SERVER_REQUESTED) {
                    return;
                }
                // One-shot command pref: reset before acting.
                prefs.set_boolean(RESTART_SERVER_REQUESTED, false);
                info!("Server restart requested via preference");
                if self.started && !self.is_restarting && !self.is_updating {
                    self.begin_restart(false, None);
                }
            }
            _ => {}
        }
    }

    // -------------------------------------------------------------------
    // Stop
    // -------------------------------------------------------------------

    async fn stop_impl(&mut self) {
        // Invalidate every outstanding deferred callback in one move.
        self.generation += 1;

        self.is_restarting = false;
        self.is_updating = false;
        if let Some(callback) = self.update_callback.take() {
            let _ = callback.send(false);
        }

        if let Some(updater) = &self.updater {
            updater.stop();
        }

        if let Some(mut process) = self.process.take() {
            info!("Stopping server process (pid {})", process.pid);
            // Non-forceful first; escalation happens off the actor.
            if let Err(e) = self.process_controller.terminate(&mut process, false) {
                warn!("Graceful terminate failed: {}", e);
            }
            let controller = Arc::clone(&self.process_controller);
            tokio::task::spawn_blocking(move || {
                if controller
                    .wait_for_exit_with_timeout(&mut process, GRACEFUL_EXIT_TIMEOUT)
                    .is_none()
                {
                    let _ = controller.terminate(&mut process, true);
                }
            });
        }

        if let Err(e) = self.state_store.delete() {
            warn!("Failed to delete server state record: {}", e);
        }

        self.proxy.stop().await;
        self.cdp_bridge.stop().await;

        self.lock = None;
        self.is_running = false;
        self.started = false;
        self.consecutive_startup_failures = 0;
        self.last_launch_time = None;
    }
}

fn clamp_port(value: i32) -> u16 {
    if (1..=i32::from(u16::MAX)).contains(&value) {
        value as u16
    } else {
        0
    }
}

#[cfg(test)]
mod backoff_tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(relaunch_backoff(1), Duration::from_secs(1));
        assert_eq!(relaunch_backoff(2), Duration::from_secs(2));
        assert_eq!(relaunch_backoff(3), Duration::from_secs(4));
        assert_eq!(relaunch_backoff(5), Duration::from_secs(16));
        assert_eq!(relaunch_backoff(7), Duration::from_secs(60));
        assert_eq!(relaunch_backoff(50), Duration::from_secs(60));
    }

    #[test]
    fn test_clamp_port() {
        assert_eq!(clamp_port(0), 0);
        assert_eq!(clamp_port(-1), 0);
        assert_eq!(clamp_port(9222), 9222);
        assert_eq!(clamp_port(65535), 65535);
        assert_eq!(clamp_port(65536), 0);
    }
}
