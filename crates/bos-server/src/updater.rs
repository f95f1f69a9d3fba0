//! Server binary/resources resolution.
//!
//! The update *download* mechanism is out of scope; this seam only answers
//! "which binary should the next launch use" and lets the manager blacklist
//! a downloaded version that failed to start.

use semver::Version;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Name of the server binary inside an install or version directory.
#[cfg(not(windows))]
pub const SERVER_BINARY_NAME: &str = "browseros_server";
#[cfg(windows)]
pub const SERVER_BINARY_NAME: &str = "browseros_server.exe";

/// Name of the resources subdirectory.
pub const RESOURCES_DIR_NAME: &str = "resources";

/// Marker file written into an invalidated version directory.
const INVALID_MARKER: &str = ".invalid";

/// Resolves the best available server binary and resources.
pub trait ServerUpdater: Send + Sync {
    /// Best available server binary (downloaded update if valid, else the
    /// bundled binary).
    fn best_server_binary_path(&self) -> PathBuf;

    /// Resources directory matching the best binary.
    fn best_server_resources_path(&self) -> PathBuf;

    /// Version string of the best binary, when known.
    fn best_server_version(&self) -> Option<String> {
        None
    }

    /// Mark the currently selected downloaded version as broken so it is not
    /// retried. Called when a launch had to use the bundled fallback.
    fn invalidate_downloaded_version(&self);

    /// Stop any background activity.
    fn stop(&self);
}

/// Default updater: picks the highest non-invalidated semver directory under
/// `downloads_dir`, else the bundled install.
///
/// Layout: `<downloads_dir>/<version>/browseros_server` plus
/// `<downloads_dir>/<version>/resources/`. Invalidation writes a marker file
/// into the version directory, so the verdict survives restarts.
pub struct DirServerUpdater {
    bundled_dir: PathBuf,
    downloads_dir: PathBuf,
    stopped: Mutex<bool>,
}

impl DirServerUpdater {
    pub fn new(bundled_dir: PathBuf, downloads_dir: PathBuf) -> Self {
        Self {
            bundled_dir,
            downloads_dir,
            stopped: Mutex::new(false),
        }
    }

    /// The bundled (fallback) binary path.
    pub fn bundled_binary_path(&self) -> PathBuf {
        self.bundled_dir.join(SERVER_BINARY_NAME)
    }

    fn best_downloaded_version(&self) -> Option<(Version, PathBuf)> {
        let entries = std::fs::read_dir(&self.downloads_dir).ok()?;

        let mut best: Option<(Version, PathBuf)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            let version = match Version::parse(name) {
                Ok(v) => v,
                Err(_) => {
                    debug!("Skipping non-semver download directory: {}", name);
                    continue;
                }
            };

            if path.join(INVALID_MARKER).exists() {
                debug!("Skipping invalidated version {}", version);
                continue;
            }
            if !path.join(SERVER_BINARY_NAME).exists() {
                debug!("Skipping incomplete version {} (no binary)", version);
                continue;
            }

            match &best {
                Some((current, _)) if *current >= version => {}
                _ => best = Some((version, path)),
            }
        }

        best
    }
}

impl ServerUpdater for DirServerUpdater {
    fn best_server_binary_path(&self) -> PathBuf {
        match self.best_downloaded_version() {
            Some((version, dir)) => {
                debug!("Using downloaded server version {}", version);
                dir.join(SERVER_BINARY_NAME)
            }
            None => self.bundled_binary_path(),
        }
    }

    fn best_server_resources_path(&self) -> PathBuf {
        match self.best_downloaded_version() {
            Some((_, dir)) if dir.join(RESOURCES_DIR_NAME).exists() => {
                dir.join(RESOURCES_DIR_NAME)
            }
            _ => self.bundled_dir.join(RESOURCES_DIR_NAME),
        }
    }

    fn best_server_version(&self) -> Option<String> {
        self.best_downloaded_version()
            .map(|(version, _)| version.to_string())
    }

    fn invalidate_downloaded_version(&self) {
        if let Some((version, dir)) = self.best_downloaded_version() {
            let marker = dir.join(INVALID_MARKER);
            match std::fs::write(&marker, "") {
                Ok(()) => info!("Invalidated downloaded server version {}", version),
                Err(e) => warn!("Failed to invalidate version {}: {}", version, e),
            }
        }
    }

    fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
        debug!("Server updater stopped");
    }
}

/// Build a production updater rooted at the host's install/data directories.
pub fn production_updater(install_dir: &Path, data_dir: &Path) -> DirServerUpdater {
    DirServerUpdater::new(install_dir.to_path_buf(), data_dir.join("server_downloads"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_version(downloads: &Path, version: &str, with_binary: bool) -> PathBuf {
        let dir = downloads.join(version);
        std::fs::create_dir_all(&dir).unwrap();
        if with_binary {
            std::fs::write(dir.join(SERVER_BINARY_NAME), "").unwrap();
        }
        dir
    }

    #[test]
    fn test_falls_back_to_bundled_when_no_downloads() {
        let bundled = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let updater = DirServerUpdater::new(
            bundled.path().to_path_buf(),
            downloads.path().join("missing"),
        );

        assert_eq!(
            updater.best_server_binary_path(),
            bundled.path().join(SERVER_BINARY_NAME)
        );
        assert_eq!(updater.best_server_version(), None);
    }

    #[test]
    fn test_picks_highest_semver() {
        let bundled = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        make_version(downloads.path(), "1.2.0", true);
        let newest = make_version(downloads.path(), "1.10.0", true);
        make_version(downloads.path(), "1.9.9", true);

        let updater =
            DirServerUpdater::new(bundled.path().to_path_buf(), downloads.path().to_path_buf());

        assert_eq!(
            updater.best_server_binary_path(),
            newest.join(SERVER_BINARY_NAME)
        );
        assert_eq!(updater.best_server_version(), Some("1.10.0".to_string()));
    }

    #[test]
    fn test_skips_incomplete_and_invalidated() {
        let bundled = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        make_version(downloads.path(), "2.0.0", false); // no binary
        let valid = make_version(downloads.path(), "1.5.0", true);

        let updater =
            DirServerUpdater::new(bundled.path().to_path_buf(), downloads.path().to_path_buf());
        assert_eq!(
            updater.best_server_binary_path(),
            valid.join(SERVER_BINARY_NAME)
        );

        // Invalidate 1.5.0; only the bundled binary remains usable.
        updater.invalidate_downloaded_version();
        assert_eq!(
            updater.best_server_binary_path(),
            bundled.path().join(SERVER_BINARY_NAME)
        );
    }

    #[test]
    fn test_invalidation_survives_new_instance() {
        let bundled = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        make_version(downloads.path(), "3.0.0", true);

        let updater =
            DirServerUpdater::new(bundled.path().to_path_buf(), downloads.path().to_path_buf());
        updater.invalidate_downloaded_version();

        let fresh =
            DirServerUpdater::new(bundled.path().to_path_buf(), downloads.path().to_path_buf());
        assert_eq!(fresh.best_server_version(), None);
    }
}
