//! Atomic read/write/remove of the per-session info file.

use crate::RendezvousResult;
use host_config_and_utils::Paths;
use session_protocol_types::SessionCoordinates;
use std::io::Write;
use tracing::{debug, warn};

/// Publish coordinates: write to `<name>.json.tmp`, flush, atomically
/// rename over the target. Readers never observe a half-written file.
pub fn write_info(paths: &Paths, info: &SessionCoordinates) -> RendezvousResult<()> {
    paths.ensure_dirs()?;
    let target = paths.worker_file(&info.name);
    let tmp = paths.workers_dir().join(format!("{}.json.tmp", info.name));

    let payload = serde_json::to_vec(info)?;
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, &target)?;
    debug!(name = %info.name, port = info.port, "published session coordinates");
    Ok(())
}

/// Read the info file for `name`. Absent, unreadable, and malformed files
/// all come back as `None` — callers treat them as overwriteable.
pub fn read_info(paths: &Paths, name: &str) -> Option<SessionCoordinates> {
    let path = paths.worker_file(name);
    let bytes = std::fs::read(&path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(info) => Some(info),
        Err(e) => {
            debug!(name, error = %e, "ignoring malformed info file");
            None
        }
    }
}

/// Unlink the info file for `name`. A missing file is not an error.
pub fn remove_info(paths: &Paths, name: &str) {
    let path = paths.worker_file(name);
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(name, error = %e, "failed to remove info file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_protocol_types::AuthKey;
    use tempfile::tempdir;

    fn coords(name: &str, port: u16) -> SessionCoordinates {
        SessionCoordinates::new(name, "127.0.0.1", port, &AuthKey::generate())
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let info = coords("default", 40001);
        write_info(&paths, &info).unwrap();

        let read = read_info(&paths, "default").unwrap();
        assert_eq!(read, info);
    }

    #[test]
    fn write_replaces_stale_file_atomically() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        write_info(&paths, &coords("s1", 40001)).unwrap();
        let fresh = coords("s1", 40002);
        write_info(&paths, &fresh).unwrap();

        assert_eq!(read_info(&paths, "s1").unwrap().port, 40002);
        // The temp file must not linger after the rename.
        assert!(!paths.workers_dir().join("s1.json.tmp").exists());
    }

    #[test]
    fn absent_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        assert!(read_info(&paths, "missing").is_none());
    }

    #[test]
    fn malformed_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        std::fs::write(paths.worker_file("bad"), b"{not json").unwrap();
        assert!(read_info(&paths, "bad").is_none());
    }

    #[test]
    fn remove_unlinks_and_tolerates_missing() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        write_info(&paths, &coords("gone", 40001)).unwrap();
        remove_info(&paths, "gone");
        assert!(read_info(&paths, "gone").is_none());

        // Second removal is a no-op.
        remove_info(&paths, "gone");
    }
}
