//! Single-instance lock.
//!
//! Multiple host processes may run concurrently; only the one holding the
//! lock supervises the sidecar. Contention is a designed mode, not an
//! error: the loser simply defers to the existing owner.

use bos_common::{ServerError, ServerResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock on a well-known file, released on drop.
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Try to acquire the lock.
    ///
    /// Returns `Ok(None)` when another live process holds it.
    pub fn try_acquire(path: &Path) -> ServerResult<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServerError::io("create lock directory", &e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ServerError::io("open lock file", &e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired instance lock at {}", path.display());
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(_) => {
                debug!("Instance lock at {} is held elsewhere", path.display());
                Ok(None)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!("Released instance lock at {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.lock");

        let lock = InstanceLock::try_acquire(&path).unwrap();
        assert!(lock.is_some());

        drop(lock);
        // Reacquirable after release.
        let lock = InstanceLock::try_acquire(&path).unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn test_contention_within_process_is_observable_after_release() {
        // fs2 locks are per-file-handle but a single process can reacquire;
        // true cross-process contention is exercised by spawning a child
        // holder, which is out of scope for a unit test. What must hold:
        // acquire → drop → acquire succeeds on the same path.
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.lock");

        let first = InstanceLock::try_acquire(&path).unwrap().unwrap();
        assert_eq!(first.path(), path.as_path());
        drop(first);
        assert!(InstanceLock::try_acquire(&path).unwrap().is_some());
    }
}
