//! Protocol types shared by the host bridge and session daemons.
//!
//! This crate holds:
//! - the published coordinates of a live daemon and its authentication key
//! - the command/event records exchanged between bridge and daemon
//! - the message types of the extension-facing native-messaging surface

mod coordinates;
mod messages;
mod platform;

pub use coordinates::{AuthKey, SessionCoordinates, AUTHKEY_LEN};
pub use messages::{
    ClientCommand, HostRequest, SessionEvent, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_SESSION_NAME,
    SHELL_PLACEHOLDER,
};
pub use platform::Platform;
