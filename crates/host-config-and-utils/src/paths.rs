//! File system paths for the host and its session daemons.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Environment override for the state directory. Mainly for tests, but also
/// lets users relocate the whole on-disk footprint.
pub const STATE_DIR_ENV: &str = "RUN_IN_TERMINAL_STATE_DIR";

/// Directory name under the per-OS state root.
const APP_DIR_NAME: &str = "run_in_terminal";

/// Manages file system paths for per-user session state.
///
/// Layout under the base directory:
/// - `workers/<name>.json` — published coordinates of a live session daemon
/// - `locks/<name>.lock` — advisory spawn lock per session name
/// - `rit.log` — append-only diagnostic log
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Resolve the state directory for this user.
    ///
    /// `RUN_IN_TERMINAL_STATE_DIR` wins when set; otherwise:
    /// - Windows: `%LOCALAPPDATA%\run_in_terminal`
    /// - macOS: `~/Library/Application Support/run_in_terminal`
    /// - elsewhere: `$XDG_STATE_HOME/run_in_terminal`, falling back to
    ///   `~/.local/state/run_in_terminal`
    pub fn new() -> CoreResult<Self> {
        if let Some(dir) = std::env::var_os(STATE_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(Self {
                    base_dir: PathBuf::from(dir),
                });
            }
        }

        let base_dir = Self::platform_base_dir()?;
        Ok(Self { base_dir })
    }

    #[cfg(windows)]
    fn platform_base_dir() -> CoreResult<PathBuf> {
        let local = std::env::var_os("LOCALAPPDATA")
            .map(PathBuf::from)
            .or_else(dirs::data_local_dir)
            .ok_or_else(|| CoreError::Path("Could not determine %LOCALAPPDATA%".to_string()))?;
        Ok(local.join(APP_DIR_NAME))
    }

    #[cfg(target_os = "macos")]
    fn platform_base_dir() -> CoreResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(home
            .join("Library")
            .join("Application Support")
            .join(APP_DIR_NAME))
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    fn platform_base_dir() -> CoreResult<PathBuf> {
        if let Some(xdg) = std::env::var_os("XDG_STATE_HOME") {
            if !xdg.is_empty() {
                return Ok(PathBuf::from(xdg).join(APP_DIR_NAME));
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(home.join(".local").join("state").join(APP_DIR_NAME))
    }

    /// Create a Paths instance rooted at a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base state directory.
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the directory holding one info file per live session daemon.
    pub fn workers_dir(&self) -> PathBuf {
        self.base_dir.join("workers")
    }

    /// Get the info file path for a named session.
    pub fn worker_file(&self, name: &str) -> PathBuf {
        self.workers_dir().join(format!("{name}.json"))
    }

    /// Get the directory holding advisory spawn locks.
    pub fn locks_dir(&self) -> PathBuf {
        self.base_dir.join("locks")
    }

    /// Get the spawn lock path for a named session.
    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{name}.lock"))
    }

    /// Get the diagnostic log file path.
    pub fn log_file(&self) -> PathBuf {
        self.base_dir.join("rit.log")
    }

    /// Ensure the base directory and its subdirectories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.workers_dir())?;
        std::fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }
}

/// The user's home directory, used as the working directory for spawned
/// shells. Falls back to the current directory when the home cannot be
/// resolved, so a spawn never fails on this alone.
pub fn home_dir() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home;
    }
    #[cfg(windows)]
    if let Some(profile) = std::env::var_os("USERPROFILE") {
        if !profile.is_empty() {
            return PathBuf::from(profile);
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-rit");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.workers_dir(), base.join("workers"));
        assert_eq!(paths.worker_file("default"), base.join("workers/default.json"));
        assert_eq!(paths.locks_dir(), base.join("locks"));
        assert_eq!(paths.lock_file("default"), base.join("locks/default.lock"));
        assert_eq!(paths.log_file(), base.join("rit.log"));
    }

    #[test]
    fn ensure_dirs_creates_directories() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("state");
        let paths = Paths::with_base_dir(base.clone());

        assert!(!base.exists());
        paths.ensure_dirs().unwrap();

        assert!(paths.workers_dir().is_dir());
        assert!(paths.locks_dir().is_dir());
    }

    #[test]
    fn ensure_dirs_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(paths.workers_dir().exists());
    }

    #[test]
    fn worker_file_embeds_session_name() {
        let paths = Paths::with_base_dir(PathBuf::from("/x"));
        assert!(paths
            .worker_file("shared")
            .to_string_lossy()
            .ends_with("workers/shared.json"));
    }

    #[test]
    fn home_dir_is_never_empty() {
        let home = home_dir();
        assert!(!home.as_os_str().is_empty());
    }
}
