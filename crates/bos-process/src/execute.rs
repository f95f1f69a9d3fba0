//! Process spawning.

use bos_common::{ServerError, ServerResult};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::debug;

/// Spawn a detached daemon-style child process.
///
/// stdin is closed; stdout/stderr are inherited so the child's own logging
/// reaches the supervisor's output streams.
pub fn spawn_process(
    executable: &Path,
    args: &[String],
    working_dir: Option<&Path>,
) -> ServerResult<Child> {
    let mut command = Command::new(executable);
    command.args(args).stdin(Stdio::null());

    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    debug!("Spawning {} with args {:?}", executable.display(), args);

    command.spawn().map_err(|e| {
        ServerError::spawn_failed(format!("{}: {}", executable.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    #[cfg(unix)]
    fn test_spawn_and_reap() {
        let mut child = spawn_process(
            Path::new("/bin/sh"),
            &["-c".to_string(), "exit 0".to_string()],
            None,
        )
        .unwrap();
        let status = child.wait().unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_spawn_missing_binary() {
        let result = spawn_process(
            &PathBuf::from("/nonexistent/browseros_server"),
            &[],
            None,
        );
        assert!(matches!(result, Err(ServerError::SpawnFailed { .. })));
    }
}
