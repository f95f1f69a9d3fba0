//! Process launch and termination seam.
//!
//! The manager never touches OS process APIs directly; it drives this trait.
//! The default implementation spawns the server binary, falls back to the
//! bundled binary when a downloaded one fails to start, and performs bounded
//! waits that the manager dispatches to a worker thread.

use bos_common::{ServerError, ServerResult};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ports::ServerPorts;

/// Everything needed for one launch attempt. Built fresh before every
/// launch; never persisted.
#[derive(Debug, Clone)]
pub struct ServerLaunchConfig {
    /// Primary executable (the updater's best available binary).
    pub executable: PathBuf,
    /// Bundled fallback tried when the primary fails to spawn.
    pub fallback_executable: Option<PathBuf>,
    /// Resources directory handed to the server.
    pub resources_dir: PathBuf,
    /// Full port set; the backend binds `server`, `extension` and `agent`.
    pub ports: ServerPorts,
    /// Whether the backend may accept non-local MCP connections.
    pub allow_remote: bool,
    /// Extra command-line arguments appended verbatim.
    pub extra_args: Vec<String>,
}

impl ServerLaunchConfig {
    /// Command-line arguments the server binary is launched with.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--server-port={}", self.ports.server),
            format!("--extension-port={}", self.ports.extension),
            format!("--agent-port={}", self.ports.agent),
            format!("--cdp-port={}", self.ports.cdp),
            format!("--proxy-port={}", self.ports.proxy),
            format!("--resources-dir={}", self.resources_dir.display()),
        ];
        if self.allow_remote {
            args.push("--allow-remote".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// An owned handle to the launched (or adopted) server process.
///
/// `child` is absent for processes recovered from a state record; those can
/// only be observed and signalled by PID.
pub struct ServerProcess {
    pub pid: u32,
    /// Creation time in seconds since the Unix epoch, for identity checks.
    pub creation_time: u64,
    child: Option<Child>,
}

impl ServerProcess {
    pub fn from_child(child: Child) -> Self {
        let pid = child.id();
        let creation_time = bos_process::process_creation_time(pid).unwrap_or(0);
        Self {
            pid,
            creation_time,
            child: Some(child),
        }
    }

    pub fn from_pid(pid: u32, creation_time: u64) -> Self {
        Self {
            pid,
            creation_time,
            child: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        bos_process::process_exists(self.pid).unwrap_or(false)
    }

    /// Non-blocking exit-code collection for an owned child. Returns `None`
    /// when the child is still running or is not owned by this handle.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProcess")
            .field("pid", &self.pid)
            .field("creation_time", &self.creation_time)
            .field("owned", &self.child.is_some())
            .finish()
    }
}

/// Outcome of a successful launch.
pub struct LaunchResult {
    pub process: ServerProcess,
    /// True when the primary binary failed and the bundled fallback was
    /// launched instead. The caller must invalidate the downloaded version.
    pub used_fallback: bool,
}

/// Seam between the manager and OS process control.
pub trait ProcessController: Send + Sync {
    /// Launch the server. Tries the primary executable, then the fallback.
    fn launch(&self, config: &ServerLaunchConfig) -> ServerResult<LaunchResult>;

    /// Terminate the process. `force == false` requests a graceful stop.
    fn terminate(&self, process: &mut ServerProcess, force: bool) -> ServerResult<()>;

    /// Wait for the process to exit, up to `timeout`. Blocking; callers must
    /// dispatch to a worker. Returns the exit code when the process exited
    /// within the timeout (unobservable codes map to -1).
    fn wait_for_exit_with_timeout(
        &self,
        process: &mut ServerProcess,
        timeout: Duration,
    ) -> Option<i32>;
}

/// Production controller built on the `bos-process` primitives.
#[derive(Default)]
pub struct DefaultProcessController;

impl DefaultProcessController {
    pub fn new() -> Self {
        Self
    }

    fn spawn(executable: &Path, config: &ServerLaunchConfig) -> ServerResult<Child> {
        let args = config.to_args();
        bos_process::spawn_process(executable, &args, None)
    }
}

impl ProcessController for DefaultProcessController {
    fn launch(&self, config: &ServerLaunchConfig) -> ServerResult<LaunchResult> {
        match Self::spawn(&config.executable, config) {
            Ok(child) => {
                info!(
                    "Launched server {} (pid {})",
                    config.executable.display(),
                    child.id()
                );
                Ok(LaunchResult {
                    process: ServerProcess::from_child(child),
                    used_fallback: false,
                })
            }
            Err(primary_err) => {
                let fallback = match &config.fallback_executable {
                    Some(path) if *path != config.executable => path,
                    _ => return Err(primary_err),
                };

                warn!(
                    "Primary server binary failed ({}), trying bundled fallback {}",
                    primary_err,
                    fallback.display()
                );

                let child = Self::spawn(fallback, config)?;
                info!("Launched fallback server (pid {})", child.id());
                Ok(LaunchResult {
                    process: ServerProcess::from_child(child),
                    used_fallback: true,
                })
            }
        }
    }

    fn terminate(&self, process: &mut ServerProcess, force: bool) -> ServerResult<()> {
        debug!("Terminating server pid {} (force: {})", process.pid, force);
        let result = if force {
            bos_process::force_kill(process.pid)
        } else {
            bos_process::terminate_gracefully(process.pid)
        };

        match result {
            Ok(()) => Ok(()),
            // Already gone: termination achieved its goal.
            Err(_) if !process.is_alive() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn wait_for_exit_with_timeout(
        &self,
        process: &mut ServerProcess,
        timeout: Duration,
    ) -> Option<i32> {
        match process.child.as_mut() {
            Some(child) => bos_process::wait_child_with_timeout(child, timeout),
            None => {
                if bos_process::wait_pid_with_timeout(process.pid, timeout) {
                    Some(-1)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(executable: &str, fallback: Option<&str>) -> ServerLaunchConfig {
        ServerLaunchConfig {
            executable: PathBuf::from(executable),
            fallback_executable: fallback.map(PathBuf::from),
            resources_dir: PathBuf::from("/tmp/resources"),
            ports: ServerPorts {
                cdp: 9222,
                proxy: 9100,
                server: 9400,
                extension: 9500,
                agent: 9600,
            },
            allow_remote: false,
            extra_args: Vec::new(),
        }
    }

    #[test]
    fn test_launch_args() {
        let mut config = test_config("/bin/true", None);
        config.allow_remote = true;
        config.extra_args = vec!["--verbose".to_string()];

        let args = config.to_args();
        assert!(args.contains(&"--server-port=9400".to_string()));
        assert!(args.contains(&"--extension-port=9500".to_string()));
        assert!(args.contains(&"--allow-remote".to_string()));
        assert_eq!(args.last().unwrap(), "--verbose");
    }

    #[test]
    #[cfg(unix)]
    fn test_launch_and_wait() {
        let controller = DefaultProcessController::new();
        let config = test_config("/bin/true", None);

        let mut result = controller.launch(&config).unwrap();
        assert!(!result.used_fallback);

        let code = controller.wait_for_exit_with_timeout(&mut result.process, Duration::from_secs(5));
        assert_eq!(code, Some(0));
    }

    #[test]
    #[cfg(unix)]
    fn test_fallback_used_when_primary_missing() {
        let controller = DefaultProcessController::new();
        let config = test_config("/nonexistent/browseros_server", Some("/bin/true"));

        let mut result = controller.launch(&config).unwrap();
        assert!(result.used_fallback);
        controller.wait_for_exit_with_timeout(&mut result.process, Duration::from_secs(5));
    }

    #[test]
    fn test_launch_fails_without_fallback() {
        let controller = DefaultProcessController::new();
        let config = test_config("/nonexistent/browseros_server", None);
        assert!(controller.launch(&config).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_terminate_running_process() {
        let controller = DefaultProcessController::new();
        let child = bos_process::spawn_process(
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
            None,
        )
        .unwrap();
        let mut process = ServerProcess::from_child(child);

        controller.terminate(&mut process, false).unwrap();
        let code = controller.wait_for_exit_with_timeout(&mut process, Duration::from_secs(5));
        assert!(code.is_some());
    }
}
