//! The bridge ↔ daemon transport: whole-JSON records over loopback TCP,
//! framed with a length prefix and gated by an HMAC handshake on the
//! daemon's 32-byte authkey.

mod channel;
mod error;
mod frame;
mod handshake;

pub use channel::{RecordChannel, RecordReceiver, RecordSender};
pub use error::{IpcError, IpcResult};
pub use frame::MAX_FRAME_LEN;
pub use handshake::HANDSHAKE_TIMEOUT;
