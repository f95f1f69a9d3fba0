//! Command and event types for the manager actor.
//!
//! Commands arrive from [`super::ServerManager`] handles; events are posted
//! back by offloaded work (health probes, HTTP terminate, blocking process
//! waits, backoff sleeps). Every event carries the generation it was spawned
//! under so work outlived by a stop/shutdown is dropped instead of acting on
//! fresh state.

use crate::ports::ServerPorts;
use std::path::PathBuf;
use tokio::sync::oneshot;

pub(super) enum ManagerCommand {
    Start {
        resp: oneshot::Sender<()>,
    },
    Stop {
        resp: oneshot::Sender<()>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
    IsRunning {
        resp: oneshot::Sender<bool>,
    },
    GetPorts {
        resp: oneshot::Sender<ServerPorts>,
    },
    IsAllowRemoteInMcp {
        resp: oneshot::Sender<bool>,
    },
    RestartForUpdate {
        resp: oneshot::Sender<bool>,
    },
    GetExecutablePath {
        resp: oneshot::Sender<PathBuf>,
    },
    GetResourcesPath {
        resp: oneshot::Sender<PathBuf>,
    },

    #[cfg(test)]
    TestSetRunning {
        running: bool,
        resp: oneshot::Sender<()>,
    },
    #[cfg(test)]
    TestHealthCheckComplete {
        success: bool,
        resp: oneshot::Sender<()>,
    },
    #[cfg(test)]
    TestProcessExited {
        exit_code: i32,
        resp: oneshot::Sender<()>,
    },
}

/// Internal events posted back to the actor by offloaded work.
#[derive(Debug)]
pub(super) enum ManagerEvent {
    HealthCheckComplete { generation: u64, success: bool },
    TerminateHttpComplete { generation: u64 },
    ProcessWaitComplete {
        generation: u64,
        exit_code: Option<i32>,
    },
    RetryLaunch { generation: u64 },
}

impl ManagerEvent {
    pub(super) fn generation(&self) -> u64 {
        match self {
            ManagerEvent::HealthCheckComplete { generation, .. }
            | ManagerEvent::TerminateHttpComplete { generation }
            | ManagerEvent::ProcessWaitComplete { generation, .. }
            | ManagerEvent::RetryLaunch { generation } => *generation,
        }
    }
}
