//! Server manager - lifecycle supervisor for the sidecar server process.
//!
//! Actor-based design:
//! - A single event loop (`ServerManagerActor`) owns all supervisor state:
//!   the child process handle, the port set, the instance lock, the
//!   restart/update flags, and the pending update callback. No locking is
//!   needed around any of it.
//! - `ServerManager` is a lightweight cloneable handle that sends commands
//!   over a channel and awaits oneshot responses.
//! - Exactly two kinds of work leave the actor: blocking process waits
//!   (dispatched to a blocking worker) and HTTP probes/terminate requests
//!   (async tasks with their own timeouts). Results come back as events
//!   stamped with a generation counter; `stop()`/`shutdown()` bump the
//!   counter, which invalidates every outstanding event in one move.
//!
//! ## Single-flight restarts
//!
//! At most one restart or update is in flight. A health-check failure while
//! a restart is already running is ignored; a second
//! `restart_server_for_update` while one is pending resolves immediately
//! with `false`. Nothing is queued.
//!
//! ## Port guarantees
//!
//! The proxy and CDP ports never change across backend restarts. The
//! ephemeral backend ports (`server`, `extension`) are re-resolved on every
//! relaunch and written to the preference store before a restart's
//! completion is observable, so persisted ports and in-memory ports are
//! never seen to diverge.

mod actor;
mod commands;
mod handle;


pub use handle::{ServerManager, ServerManagerDeps};

use actor::ServerManagerActor;
use commands::{ManagerCommand, ManagerEvent};
use tokio::sync::mpsc;
use tracing::info;

/// Capacity of the command channel (callers block when saturated).
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the internal event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

impl ServerManager {
    /// Create a manager and spawn its actor task.
    pub fn new(deps: ServerManagerDeps) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ManagerCommand>(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<ManagerEvent>(EVENT_CHANNEL_CAPACITY);
        let (pref_tx, pref_rx) = mpsc::unbounded_channel::<String>();

        let actor = ServerManagerActor::new(deps, event_tx, pref_tx);
        tokio::spawn(actor.run(cmd_rx, event_rx, pref_rx));

        info!("Server manager created");
        ServerManager { cmd_tx }
    }
}
