//! IPC error types.

use thiserror::Error;

/// IPC error type.
#[derive(Error, Debug)]
pub enum IpcError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication failure during the connection handshake
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The peer took too long to complete the handshake
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// A frame exceeded the protocol limit
    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    /// Connection closed mid-exchange
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using IpcError.
pub type IpcResult<T> = Result<T, IpcError>;
