//! Wire records for both protocol surfaces.
//!
//! Extension ↔ bridge messages are tagged with `type`; bridge → daemon
//! commands are tagged with `cmd`. Terminal bytes always travel base64
//! encoded in a `data_b64` field so the JSON stays valid UTF-8.

use crate::Platform;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session name used when an `open` does not carry one.
pub const DEFAULT_SESSION_NAME: &str = "default";
/// Terminal width used when an `open` does not carry one.
pub const DEFAULT_COLS: u16 = 100;
/// Terminal height used when an `open` does not carry one.
pub const DEFAULT_ROWS: u16 = 30;
/// Argv token standing in for "the default shell" in daemon-mode dispatch.
pub const SHELL_PLACEHOLDER: &str = "_";

/// A command sent from a bridge to a session daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Raw input for the PTY, base64 encoded.
    Stdin { data_b64: String },
    /// Resize the PTY; absent fields keep the current dimension.
    Resize {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
    },
    /// Liveness probe; answered with `pong` on the same channel only.
    Ping,
    /// Ask for the session description.
    Info,
    /// Tear down the whole daemon.
    Close,
}

impl ClientCommand {
    /// Wrap raw terminal input.
    pub fn stdin(data: &[u8]) -> Self {
        ClientCommand::Stdin {
            data_b64: BASE64.encode(data),
        }
    }

    /// Parse a received record. Unknown or non-object records yield `None`
    /// and are ignored by the daemon.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// The record as a JSON value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// An event sent from a session daemon to its bridges (and forwarded on to
/// the extension), or produced locally by the bridge itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// First record on every channel, before any `data`.
    Ready {
        session: String,
        platform: Platform,
        shell: String,
    },
    /// A chunk of PTY output, base64 encoded.
    Data { data_b64: String },
    /// The child shell is gone; follows all `data` on every channel.
    Exit { code: Option<i32> },
    /// Reply to `ping`.
    Pong,
    /// Reply to `info`.
    Info {
        session: String,
        platform: Platform,
        shell: String,
        pid: u32,
    },
    /// Something went wrong handling a request.
    Error { message: String },
}

impl SessionEvent {
    /// Wrap a chunk of PTY output.
    pub fn data(chunk: &[u8]) -> Self {
        SessionEvent::Data {
            data_b64: BASE64.encode(chunk),
        }
    }

    /// An error event with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        SessionEvent::Error {
            message: message.into(),
        }
    }

    /// The record as a JSON value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// A message from the extension to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    /// Attach to (or spawn) a session daemon.
    Open {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
    },
    /// Terminal input for the attached session.
    Stdin { data_b64: String },
    /// Resize the attached session.
    Resize {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
    },
    /// Liveness probe.
    Ping,
    /// Detach this bridge; the session keeps running.
    Close,
}

impl HostRequest {
    /// Parse a framed extension message. `None` for unknown types — the
    /// bridge answers those with an `error` event.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
