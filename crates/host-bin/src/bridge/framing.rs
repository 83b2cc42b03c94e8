//! Native-messaging framing on the extension side of the bridge: a 4-byte
//! little-endian length followed by UTF-8 JSON, both directions.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Generous cap well above what a terminal frontend ever frames.
const MAX_MESSAGE_LEN: usize = 8 * 1024 * 1024;

/// Framing failures, split so callers can tell "peer gone" from "peer sent
/// garbage" — the latter is answered with an error event, not a shutdown.
#[derive(Error, Debug)]
pub enum FramingError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload was not valid JSON
    #[error("Invalid JSON in message: {0}")]
    Json(#[from] serde_json::Error),

    /// A message exceeded the size cap
    #[error("Message of {0} bytes exceeds the limit")]
    TooLarge(usize),
}

/// Read one framed message. `Ok(None)` means the extension closed stdin.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(FramingError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Write one framed message.
pub async fn write_message<W>(writer: &mut W, message: &Value) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(FramingError::TooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn roundtrip() {
        let mut buf = Vec::new();
        write_message(&mut buf, &json!({"type": "ping"})).await.unwrap();

        let mut reader = buf.as_slice();
        let message = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(message, json!({"type": "ping"}));
    }

    #[tokio::test]
    async fn header_is_little_endian() {
        let mut buf = Vec::new();
        write_message(&mut buf, &json!({})).await.unwrap();
        // `{}` is two bytes.
        assert_eq!(&buf[..4], &[2, 0, 0, 0]);
        assert_eq!(&buf[4..], b"{}");
    }

    #[tokio::test]
    async fn eof_is_none() {
        let mut reader: &[u8] = &[];
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_json_is_a_json_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(7u32).to_le_bytes());
        buf.extend_from_slice(b"not js}");

        let mut reader = buf.as_slice();
        assert!(matches!(
            read_message(&mut reader).await,
            Err(FramingError::Json(_))
        ));
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_le_bytes());

        let mut reader = buf.as_slice();
        assert!(matches!(
            read_message(&mut reader).await,
            Err(FramingError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_io_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(10u32).to_le_bytes());
        buf.extend_from_slice(b"shor");

        let mut reader = buf.as_slice();
        assert!(matches!(
            read_message(&mut reader).await,
            Err(FramingError::Io(_))
        ));
    }
}
