//! A record channel over an authenticated TCP stream.

use crate::{frame, handshake, IpcError, IpcResult};
use serde::Serialize;
use serde_json::Value;
use session_protocol_types::AuthKey;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// A duplex stream of whole JSON records between a bridge and a daemon.
///
/// Constructed only through [`RecordChannel::connect`] (bridge side) or
/// [`RecordChannel::accept`] (daemon side), so an unauthenticated channel
/// cannot exist.
pub struct RecordChannel {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl RecordChannel {
    /// Connect to a daemon and authenticate with its key.
    pub async fn connect(host: &str, port: u16, key: &AuthKey) -> IpcResult<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();
        handshake::client(&mut reader, &mut writer, key).await?;
        Ok(Self { reader, writer })
    }

    /// Authenticate an accepted connection. The whole handshake is bounded
    /// by [`handshake::HANDSHAKE_TIMEOUT`] so a stalled client cannot pin
    /// resources.
    pub async fn accept(stream: TcpStream, key: &AuthKey) -> IpcResult<Self> {
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();
        let (mut reader, mut writer) = stream.into_split();
        match tokio::time::timeout(
            handshake::HANDSHAKE_TIMEOUT,
            handshake::server(&mut reader, &mut writer, key),
        )
        .await
        {
            Ok(Ok(())) => Ok(Self { reader, writer }),
            Ok(Err(e)) => {
                debug!(?peer, error = %e, "handshake failed");
                Err(e)
            }
            Err(_) => {
                debug!(?peer, "handshake timed out");
                Err(IpcError::HandshakeTimeout)
            }
        }
    }

    /// Send one record.
    pub async fn send<T: Serialize>(&mut self, record: &T) -> IpcResult<()> {
        send_record(&mut self.writer, record).await
    }

    /// Receive the next record. `None` on clean peer EOF.
    pub async fn recv(&mut self) -> IpcResult<Option<Value>> {
        recv_record(&mut self.reader).await
    }

    /// Split into independently owned halves so one task can read while
    /// another writes.
    pub fn into_split(self) -> (RecordReceiver, RecordSender) {
        (
            RecordReceiver {
                reader: self.reader,
            },
            RecordSender {
                writer: self.writer,
            },
        )
    }
}

/// The receiving half of a [`RecordChannel`].
pub struct RecordReceiver {
    reader: OwnedReadHalf,
}

impl RecordReceiver {
    /// Receive the next record. `None` on clean peer EOF.
    pub async fn recv(&mut self) -> IpcResult<Option<Value>> {
        recv_record(&mut self.reader).await
    }
}

/// The sending half of a [`RecordChannel`].
pub struct RecordSender {
    writer: OwnedWriteHalf,
}

impl RecordSender {
    /// Send one record.
    pub async fn send<T: Serialize>(&mut self, record: &T) -> IpcResult<()> {
        send_record(&mut self.writer, record).await
    }
}

async fn send_record<T: Serialize>(writer: &mut OwnedWriteHalf, record: &T) -> IpcResult<()> {
    let payload = serde_json::to_vec(record)?;
    frame::write_frame(writer, &payload).await
}

async fn recv_record(reader: &mut OwnedReadHalf) -> IpcResult<Option<Value>> {
    match frame::read_frame(reader).await? {
        None => Ok(None),
        Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
    }
}
