//! Challenge-response authentication run directly after TCP accept.
//!
//! Server sends 32 random bytes; the client answers with
//! HMAC-SHA256(authkey, challenge); the server verifies in constant time
//! and replies `welcome` or `unauthorized`. Only after `welcome` does the
//! stream switch to JSON records.

use crate::{frame, IpcError, IpcResult};
use hmac::{Hmac, Mac};
use rand::RngCore;
use session_protocol_types::AuthKey;
use sha2::Sha256;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

type HmacSha256 = Hmac<Sha256>;

/// Challenge size in bytes.
pub const CHALLENGE_LEN: usize = 32;
/// How long the server lets a client take to authenticate.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const WELCOME: &[u8] = b"welcome";
const REJECTED: &[u8] = b"unauthorized";

fn keyed_mac(key: &AuthKey) -> IpcResult<HmacSha256> {
    HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| IpcError::Auth(e.to_string()))
}

/// Server side of the handshake.
pub async fn server<R, W>(reader: &mut R, writer: &mut W, key: &AuthKey) -> IpcResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    frame::write_frame(writer, &challenge).await?;

    let reply = frame::read_frame(reader)
        .await?
        .ok_or(IpcError::ConnectionClosed)?;

    let mut mac = keyed_mac(key)?;
    mac.update(&challenge);
    if mac.verify_slice(&reply).is_err() {
        let _ = frame::write_frame(writer, REJECTED).await;
        return Err(IpcError::Auth("client failed authentication".into()));
    }

    frame::write_frame(writer, WELCOME).await
}

/// Client side of the handshake.
pub async fn client<R, W>(reader: &mut R, writer: &mut W, key: &AuthKey) -> IpcResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let challenge = frame::read_frame(reader)
        .await?
        .ok_or(IpcError::ConnectionClosed)?;
    if challenge.len() != CHALLENGE_LEN {
        return Err(IpcError::Auth("malformed challenge".into()));
    }

    let mut mac = keyed_mac(key)?;
    mac.update(&challenge);
    frame::write_frame(writer, &mac.finalize().into_bytes()).await?;

    let verdict = frame::read_frame(reader)
        .await?
        .ok_or(IpcError::ConnectionClosed)?;
    if verdict != WELCOME {
        return Err(IpcError::Auth("server rejected authentication".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_keys_succeed() {
        let key = AuthKey::generate();
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (mut client_r, mut client_w) = tokio::io::split(client_io);
        let (mut server_r, mut server_w) = tokio::io::split(server_io);

        let server_key = key.clone();
        let server_task =
            tokio::spawn(async move { server(&mut server_r, &mut server_w, &server_key).await });

        client(&mut client_r, &mut client_w, &key).await.unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn mismatched_keys_fail_both_sides() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (mut client_r, mut client_w) = tokio::io::split(client_io);
        let (mut server_r, mut server_w) = tokio::io::split(server_io);

        let server_key = AuthKey::generate();
        let server_task =
            tokio::spawn(async move { server(&mut server_r, &mut server_w, &server_key).await });

        let client_key = AuthKey::generate();
        let client_result = client(&mut client_r, &mut client_w, &client_key).await;

        assert!(matches!(client_result, Err(IpcError::Auth(_))));
        assert!(matches!(
            server_task.await.unwrap(),
            Err(IpcError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn client_rejects_short_challenge() {
        let (mut fake_server, client_io) = tokio::io::duplex(4096);
        let (mut client_r, mut client_w) = tokio::io::split(client_io);

        frame::write_frame(&mut fake_server, b"short").await.unwrap();
        let result = client(&mut client_r, &mut client_w, &AuthKey::generate()).await;
        assert!(matches!(result, Err(IpcError::Auth(_))));
    }
}
