//! The connect-or-spawn rendezvous algorithm.

use crate::{read_info, spawn_detached, RendezvousError, RendezvousResult};
use host_config_and_utils::Paths;
use session_ipc::RecordChannel;
use session_protocol_types::SessionCoordinates;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// End-to-end rendezvous budget when the caller has no opinion.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on a single connect-plus-handshake attempt, so one black-holed
/// endpoint cannot eat the whole rendezvous budget.
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Attempt an authenticated connect to published coordinates. Any failure
/// (bad key encoding, refused, timeout, failed handshake) is `None` — the
/// file is then just stale.
pub async fn try_connect(info: &SessionCoordinates) -> Option<RecordChannel> {
    let key = info.authkey()?;
    let attempt = RecordChannel::connect(&info.host, info.port, &key);
    match tokio::time::timeout(CONNECT_ATTEMPT_TIMEOUT, attempt).await {
        Ok(Ok(channel)) => Some(channel),
        Ok(Err(e)) => {
            debug!(name = %info.name, host = %info.host, port = info.port, error = %e,
                "connect attempt failed");
            None
        }
        Err(_) => {
            debug!(name = %info.name, host = %info.host, port = info.port,
                "connect attempt timed out");
            None
        }
    }
}

/// Connect to the named session, spawning a daemon for it if needed.
///
/// 1. A published, reachable daemon wins immediately.
/// 2. Otherwise spawn a detached daemon (serialised through the advisory
///    `locks/<name>.lock` so two racing bridges do not both spawn).
/// 3. Poll — re-read the info file, re-attempt the connect — until the
///    deadline, sleeping `timeout / 100` between tries.
///
/// A stale info file left by a dead daemon is overwritten by the fresh
/// daemon's own publication, so it never needs explicit cleanup here.
pub async fn ensure_session(
    paths: &Paths,
    name: &str,
    shell: Option<&str>,
    cols: u16,
    rows: u16,
    timeout: Duration,
) -> RendezvousResult<RecordChannel> {
    if let Some(existing) = read_info(paths, name) {
        if let Some(channel) = try_connect(&existing).await {
            return Ok(channel);
        }
    }

    let lock = SpawnLock::acquire(paths, name);
    if lock.should_spawn() {
        spawn_detached(name, shell, cols, rows)?;
    } else {
        debug!(name, "spawn lock held elsewhere, waiting for publication");
    }

    let deadline = Instant::now() + timeout;
    let pause = timeout / 100;
    while Instant::now() < deadline {
        if let Some(published) = read_info(paths, name) {
            if let Some(channel) = try_connect(&published).await {
                info!(name, pid = published.pid, "session reachable");
                return Ok(channel);
            }
        }
        tokio::time::sleep(pause).await;
    }

    warn!(name, ?timeout, "session did not become reachable");
    Err(RendezvousError::Unreachable {
        name: name.to_string(),
        timeout,
    })
}

/// Advisory per-name spawn lock. Failing to take the lock file for any
/// reason other than "someone else holds it" degrades to spawning anyway:
/// duplicate daemons are tolerated, a missed spawn is not.
struct SpawnLock {
    _file: Option<fslock::LockFile>,
    should_spawn: bool,
}

impl SpawnLock {
    fn acquire(paths: &Paths, name: &str) -> Self {
        let _ = paths.ensure_dirs();
        let path = paths.lock_file(name);
        match fslock::LockFile::open(path.as_os_str()) {
            Ok(mut file) => match file.try_lock() {
                Ok(true) => Self {
                    _file: Some(file),
                    should_spawn: true,
                },
                Ok(false) => Self {
                    _file: None,
                    should_spawn: false,
                },
                Err(e) => {
                    debug!(name, error = %e, "spawn lock unavailable");
                    Self {
                        _file: None,
                        should_spawn: true,
                    }
                }
            },
            Err(e) => {
                debug!(name, error = %e, "spawn lock unavailable");
                Self {
                    _file: None,
                    should_spawn: true,
                }
            }
        }
    }

    fn should_spawn(&self) -> bool {
        self.should_spawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write_info;
    use session_protocol_types::AuthKey;
    use tempfile::tempdir;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn try_connect_reaches_a_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let key = AuthKey::generate();

        let server_key = key.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            RecordChannel::accept(stream, &server_key).await.unwrap()
        });

        let info = SessionCoordinates::new("live", "127.0.0.1", port, &key);
        assert!(try_connect(&info).await.is_some());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn try_connect_rejects_wrong_key_as_stale() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server_key = AuthKey::generate();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = RecordChannel::accept(stream, &server_key).await;
        });

        // Coordinates advertise a different key than the daemon enforces.
        let info = SessionCoordinates::new("stale", "127.0.0.1", port, &AuthKey::generate());
        assert!(try_connect(&info).await.is_none());
    }

    #[tokio::test]
    async fn try_connect_dead_endpoint_is_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let info = SessionCoordinates::new("dead", "127.0.0.1", port, &AuthKey::generate());
        assert!(try_connect(&info).await.is_none());
    }

    #[tokio::test]
    async fn try_connect_mangled_authkey_is_none() {
        let mut info = SessionCoordinates::new("mangled", "127.0.0.1", 1, &AuthKey::generate());
        info.authkey_b64 = "***".into();
        assert!(try_connect(&info).await.is_none());
    }

    #[test]
    fn spawn_lock_acquires_and_releases() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        {
            let lock = SpawnLock::acquire(&paths, "s1");
            assert!(lock.should_spawn());
        }
        // Released on drop; a fresh acquire succeeds again.
        let lock = SpawnLock::acquire(&paths, "s1");
        assert!(lock.should_spawn());
    }

    #[tokio::test]
    async fn stale_info_is_overwritten_by_fresh_publication() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let stale = SessionCoordinates::new("s", "127.0.0.1", 1, &AuthKey::generate());
        write_info(&paths, &stale).unwrap();

        let fresh = SessionCoordinates::new("s", "127.0.0.1", 2, &AuthKey::generate());
        write_info(&paths, &fresh).unwrap();

        assert_eq!(read_info(&paths, "s").unwrap().port, 2);
    }
}
