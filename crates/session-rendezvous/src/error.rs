//! Rendezvous error types.

use std::time::Duration;
use thiserror::Error;

/// Rendezvous error type.
#[derive(Error, Debug)]
pub enum RendezvousError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core path/storage error
    #[error(transparent)]
    Core(#[from] host_config_and_utils::CoreError),

    /// No daemon for the session became reachable within the timeout.
    #[error("Session {name} was not reachable within {timeout:?}")]
    Unreachable { name: String, timeout: Duration },
}

/// Result type alias using RendezvousError.
pub type RendezvousResult<T> = Result<T, RendezvousError>;
