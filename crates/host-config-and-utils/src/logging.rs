//! Logging initialization for the host and session daemons.
//!
//! Both process roles log to `rit.log` in the state directory and nowhere
//! else: the bridge's stdout carries the native-messaging protocol, and a
//! detached daemon has no stdio at all. The log file is best-effort
//! diagnostics — failing to set it up must never stop the host.

use crate::Paths;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter (same syntax as RUST_LOG).
pub const LOG_FILTER_ENV: &str = "RIT_LOG";

/// Initialize tracing with a never-rotating file appender on `rit.log`.
///
/// `default_level` is used when `RIT_LOG` is unset. Returns a guard that
/// must be held for the lifetime of the process so buffered log lines are
/// flushed on exit.
pub fn init_logging(
    paths: &Paths,
    default_level: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    if paths.ensure_dirs().is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::never(paths.base_dir(), "rit.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .ok();

    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_logging_creates_state_dirs() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("state"));

        let guard = init_logging(&paths, "info");
        assert!(guard.is_some());
        assert!(paths.workers_dir().is_dir());

        tracing::info!("logging smoke test");
        drop(guard);
    }

    #[test]
    fn init_logging_twice_is_harmless() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let first = init_logging(&paths, "debug");
        let second = init_logging(&paths, "debug");
        assert!(first.is_some());
        assert!(second.is_some());
    }
}
