//! Process termination primitives.

use bos_common::{ServerError, ServerResult};

/// Terminate a process gracefully (SIGTERM on Unix).
pub fn terminate_gracefully(pid: u32) -> ServerResult<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let nix_pid = Pid::from_raw(pid as i32);
        kill(nix_pid, Signal::SIGTERM)
            .map_err(|e| ServerError::stop_failed(format!("SIGTERM to {}: {}", pid, e)))
    }

    #[cfg(windows)]
    {
        // No SIGTERM equivalent for a detached console-less child; a forceful
        // terminate is the reliable path on Windows.
        force_kill(pid)
    }
}

/// Force kill a process (SIGKILL on Unix, TerminateProcess on Windows).
pub fn force_kill(pid: u32) -> ServerResult<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let nix_pid = Pid::from_raw(pid as i32);
        kill(nix_pid, Signal::SIGKILL)
            .map_err(|e| ServerError::stop_failed(format!("SIGKILL to {}: {}", pid, e)))
    }

    #[cfg(windows)]
    {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

        unsafe {
            let handle = match OpenProcess(PROCESS_TERMINATE, false, pid) {
                Ok(h) if !h.is_invalid() => h,
                _ => {
                    return Err(ServerError::stop_failed(format!(
                        "Failed to open process {} for termination",
                        pid
                    )));
                }
            };

            let result = TerminateProcess(handle, 1);
            let _ = CloseHandle(handle);

            result.map_err(|e| {
                ServerError::stop_failed(format!("TerminateProcess({}) failed: {}", pid, e))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::process_exists;
    use crate::execute::spawn_process;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    #[cfg(unix)]
    fn test_terminate_gracefully() {
        let mut child = spawn_process(
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
            None,
        )
        .unwrap();
        let pid = child.id();

        terminate_gracefully(pid).unwrap();

        // Reap and confirm the process is gone.
        let _ = child.wait();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!process_exists(pid).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_force_kill() {
        let mut child = spawn_process(
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
            None,
        )
        .unwrap();
        let pid = child.id();

        force_kill(pid).unwrap();
        let _ = child.wait();
        assert!(!process_exists(pid).unwrap());
    }
}
