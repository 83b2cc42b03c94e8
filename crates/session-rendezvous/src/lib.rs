//! How a bridge finds a live session daemon, or brings one into existence.
//!
//! The daemon publishes its coordinates to `workers/<name>.json` only after
//! its listener is bound and its PTY spawned; bridges read that file,
//! attempt an authenticated connect, and fall back to spawning a detached
//! daemon and polling until it publishes. Stale files are harmless: the
//! connect fails and the fresh daemon's publication atomically replaces
//! them.

mod ensure;
mod error;
mod info;
mod spawn;

pub use ensure::{ensure_session, try_connect, DEFAULT_TIMEOUT};
pub use error::{RendezvousError, RendezvousResult};
pub use info::{read_info, remove_info, write_info};
pub use spawn::spawn_detached;
