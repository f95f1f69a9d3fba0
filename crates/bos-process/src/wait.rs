//! Bounded waiting for process exit.
//!
//! Two flavors: an owned `std::process::Child` is waited on directly (via
//! the `wait-timeout` crate, which also reaps the zombie), while a bare PID
//! (a process we did not spawn) is polled for existence until the deadline.
//!
//! Both calls block and must be dispatched to a worker thread by async
//! callers.

use crate::check::process_exists;
use std::process::Child;
use std::time::{Duration, Instant};
use tracing::debug;
use wait_timeout::ChildExt;

/// Poll interval for PID-based waits.
const PID_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wait for an owned child to exit, up to `timeout`.
///
/// Returns `Some(exit_code)` if the child exited within the timeout (the
/// code is `None`-mapped to -1 when the process was signal-killed), or
/// `None` if it is still running.
pub fn wait_child_with_timeout(child: &mut Child, timeout: Duration) -> Option<i32> {
    match child.wait_timeout(timeout) {
        Ok(Some(status)) => {
            let code = status.code().unwrap_or(-1);
            debug!("Child {} exited with code {}", child.id(), code);
            Some(code)
        }
        Ok(None) => None,
        Err(e) => {
            // A wait error means we cannot observe the child anymore; treat
            // it as exited with an unknown code so callers stop waiting.
            debug!("wait_timeout failed for child {}: {}", child.id(), e);
            Some(-1)
        }
    }
}

/// Wait for an unowned PID to disappear, up to `timeout`.
///
/// Returns true if the process vanished within the timeout. The exit code of
/// a process we did not spawn is unobservable.
pub fn wait_pid_with_timeout(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match process_exists(pid) {
            Ok(false) => return true,
            Ok(true) => {}
            // Check errors are transient permission oddities; keep polling.
            Err(_) => {}
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(PID_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::spawn_process;
    use std::path::Path;

    #[test]
    #[cfg(unix)]
    fn test_wait_child_exits_in_time() {
        let mut child = spawn_process(
            Path::new("/bin/sh"),
            &["-c".to_string(), "exit 7".to_string()],
            None,
        )
        .unwrap();

        let code = wait_child_with_timeout(&mut child, Duration::from_secs(5));
        assert_eq!(code, Some(7));
    }

    #[test]
    #[cfg(unix)]
    fn test_wait_child_times_out() {
        let mut child = spawn_process(
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
            None,
        )
        .unwrap();

        let code = wait_child_with_timeout(&mut child, Duration::from_millis(100));
        assert_eq!(code, None);

        child.kill().unwrap();
        let _ = child.wait();
    }

    #[test]
    #[cfg(unix)]
    fn test_wait_pid_vanishes() {
        let mut child = spawn_process(
            Path::new("/bin/sh"),
            &["-c".to_string(), "exit 0".to_string()],
            None,
        )
        .unwrap();
        let pid = child.id();
        let _ = child.wait();

        assert!(wait_pid_with_timeout(pid, Duration::from_secs(2)));
    }
}
