//! PTY error types.

use thiserror::Error;

/// PTY error type. Only spawning can fail loudly; runtime I/O on a live PTY
/// is best-effort and logged instead.
#[derive(Error, Debug)]
pub enum PtyError {
    /// The child shell could not be started.
    #[error("Failed to spawn shell: {0}")]
    Spawn(String),
}

/// Result type alias using PtyError.
pub type PtyResult<T> = Result<T, PtyError>;
