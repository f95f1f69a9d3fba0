//! On-disk server-state record for orphan detection.
//!
//! The record is written after every successful launch and deleted on clean
//! stop. At startup it is read exactly once: a surviving record means the
//! previous supervisor did not shut down cleanly, and the recorded
//! `{pid, creation_time}` pair identifies whether that child still exists.

use bos_common::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Identity of the last launched server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    pub pid: u32,
    /// Process creation time in seconds since the Unix epoch. Guards against
    /// PID reuse after a host crash.
    pub creation_time: u64,
}

/// Persistence seam for the server-state record.
pub trait ServerStateStore: Send + Sync {
    fn read(&self) -> Option<ServerState>;
    fn write(&self, state: &ServerState) -> ServerResult<()>;
    fn delete(&self) -> ServerResult<()>;
}

/// Default store: a small JSON file, written atomically.
pub struct FileServerStateStore {
    path: PathBuf,
}

impl FileServerStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ServerStateStore for FileServerStateStore {
    fn read(&self) -> Option<ServerState> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                debug!("Unreadable server state file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn write(&self, state: &ServerState) -> ServerResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServerError::io("create state directory", &e))?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ServerError::configuration(format!("serialize server state: {}", e)))?;

        // Atomic write: temp file, then rename.
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, json)
            .map_err(|e| ServerError::io("write server state", &e))?;
        std::fs::rename(&temp_path, &self.path)
            .map_err(|e| ServerError::io("rename server state", &e))?;

        debug!("Wrote server state: pid={}", state.pid);
        Ok(())
    }

    fn delete(&self) -> ServerResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| ServerError::io("delete server state", &e))?;
            debug!("Deleted server state file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let store = FileServerStateStore::new(dir.path().join("server_state.json"));
        assert_eq!(store.read(), None);
    }

    #[test]
    fn test_write_read_delete() {
        let dir = tempdir().unwrap();
        let store = FileServerStateStore::new(dir.path().join("server_state.json"));

        let state = ServerState {
            pid: 4242,
            creation_time: 1_700_000_000,
        };
        store.write(&state).unwrap();
        assert_eq!(store.read(), Some(state));

        store.delete().unwrap();
        assert_eq!(store.read(), None);
        // Delete is idempotent.
        store.delete().unwrap();
    }

    #[test]
    fn test_corrupt_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server_state.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileServerStateStore::new(path);
        assert_eq!(store.read(), None);
    }
}
