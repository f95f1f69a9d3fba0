//! Process identity information.
//!
//! The supervisor persists `{pid, creation_time}` so that a PID reused by an
//! unrelated process after a crash is not mistaken for the old server.

use sysinfo::{Pid, ProcessRefreshKind, System};
use tracing::debug;

/// Look up the creation time (seconds since the Unix epoch) of a live
/// process.
///
/// Returns `None` when the process does not exist or the platform cannot
/// report a start time.
pub fn process_creation_time(pid: u32) -> Option<u64> {
    let mut system = System::new();
    let sysinfo_pid = Pid::from_u32(pid);

    // Must request a refresh for the specific process; without this, sysinfo
    // returns stale/zero data.
    if !system.refresh_process_specifics(sysinfo_pid, ProcessRefreshKind::new()) {
        debug!("Process {} not found for creation-time lookup", pid);
        return None;
    }

    system.process(sysinfo_pid).map(|p| p.start_time())
}

/// Check whether a live process matches a previously recorded identity.
///
/// A PID match alone is not enough: after a host crash the PID may have been
/// recycled. The creation time disambiguates, with a one-second tolerance
/// because some platforms round start times to whole seconds.
pub fn process_matches(pid: u32, recorded_creation_time: u64) -> bool {
    match process_creation_time(pid) {
        Some(actual) => actual.abs_diff(recorded_creation_time) <= 1,
        None => false,
    }
}
