//! PTY backend platform tag.

use serde::{Deserialize, Serialize};

/// Which PTY variant a session daemon ended up with at spawn time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    /// POSIX pty pair; the child shell is a session leader on the slave.
    PosixPty,
    /// Windows pseudo-console.
    WinPty,
    /// Windows anonymous-pipe fallback; no resize capability.
    WinPipe,
}

impl Platform {
    /// The wire spelling (`posix-pty`, `win-pty`, `win-pipe`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::PosixPty => "posix-pty",
            Platform::WinPty => "win-pty",
            Platform::WinPipe => "win-pipe",
        }
    }

    /// Whether an empty PTY read is conclusive for end-of-stream. On POSIX a
    /// transient empty read does not yet mean the child exited.
    pub fn eof_is_conclusive(&self) -> bool {
        !matches!(self, Platform::PosixPty)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
