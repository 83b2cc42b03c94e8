//! The host bridge: one short-lived process per browser invocation,
//! translating the extension's framed stdio into a session-daemon channel.
//!
//! Two tasks run per bridge: this module's inbound loop on stdin, and a
//! daemon-reader task that forwards every record from the attached daemon
//! to the extension. All extension-bound messages — local replies and
//! forwarded records alike — funnel through a single writer task so the
//! framing on stdout can never interleave.

mod framing;

use framing::FramingError;
use host_config_and_utils::Paths;
use serde_json::Value;
use session_ipc::RecordSender;
use session_protocol_types::{
    ClientCommand, HostRequest, SessionEvent, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_SESSION_NAME,
};
use session_rendezvous::{ensure_session, RendezvousResult, DEFAULT_TIMEOUT};
use tokio::io::AsyncRead;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Run the bridge until the extension closes stdin or sends `close`.
pub async fn run(paths: Paths) -> anyhow::Result<()> {
    info!("bridge started");

    let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(write_loop(out_rx));

    let mut stdin = tokio::io::stdin();
    inbound_loop(&paths, &mut stdin, &out_tx).await;

    // Dropping the last sender lets the writer drain queued messages.
    drop(out_tx);
    let _ = writer.await;
    info!("bridge stopped");
    Ok(())
}

async fn write_loop(mut out_rx: UnboundedReceiver<Value>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = out_rx.recv().await {
        if let Err(e) = framing::write_message(&mut stdout, &message).await {
            warn!(error = %e, "failed writing to extension");
            break;
        }
    }
}

async fn inbound_loop<R>(paths: &Paths, stdin: &mut R, out_tx: &UnboundedSender<Value>)
where
    R: AsyncRead + Unpin,
{
    let mut client: Option<DaemonClient> = None;
    let mut cols = DEFAULT_COLS;
    let mut rows = DEFAULT_ROWS;

    loop {
        let message = match framing::read_message(stdin).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                // Extension went away. Detach quietly: the daemon and its
                // shell keep running for the next bridge.
                info!("extension closed stdin, detaching");
                if let Some(active) = client.take() {
                    active.detach();
                }
                return;
            }
            Err(FramingError::Json(e)) => {
                debug!(error = %e, "malformed message from extension");
                send_event(out_tx, SessionEvent::error("invalid message"));
                continue;
            }
            Err(e) => {
                warn!(error = %e, "extension stdin broken");
                if let Some(active) = client.take() {
                    active.detach();
                }
                return;
            }
        };

        let Some(request) = HostRequest::from_value(&message) else {
            send_event(out_tx, SessionEvent::error("unknown"));
            continue;
        };

        match request {
            HostRequest::Open {
                session,
                shell,
                cols: open_cols,
                rows: open_rows,
            } => {
                let session = session.unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string());
                cols = open_cols.unwrap_or(cols);
                rows = open_rows.unwrap_or(rows);

                // At most one active client: a re-open replaces the old
                // attachment before the new rendezvous.
                if let Some(previous) = client.take() {
                    previous.detach();
                }

                match DaemonClient::connect_or_spawn(
                    paths,
                    &session,
                    shell.as_deref(),
                    cols,
                    rows,
                    out_tx.clone(),
                )
                .await
                {
                    Ok(attached) => client = Some(attached),
                    Err(e) => {
                        warn!(session = %session, error = %e, "open failed");
                        send_event(out_tx, SessionEvent::error(e.to_string()));
                    }
                }
            }
            HostRequest::Stdin { data_b64 } => match client.as_mut() {
                None => send_event(out_tx, SessionEvent::error("stdin before open")),
                Some(active) => match BASE64.decode(data_b64.as_bytes()) {
                    Ok(bytes) => {
                        if let Err(e) = active.send(&ClientCommand::stdin(&bytes)).await {
                            send_event(out_tx, SessionEvent::error(e.to_string()));
                        }
                    }
                    Err(e) => send_event(out_tx, SessionEvent::error(format!("bad base64: {e}"))),
                },
            },
            HostRequest::Resize {
                cols: new_cols,
                rows: new_rows,
            } => {
                cols = new_cols.unwrap_or(cols);
                rows = new_rows.unwrap_or(rows);
                if let Some(active) = client.as_mut() {
                    let command = ClientCommand::Resize {
                        cols: Some(cols),
                        rows: Some(rows),
                    };
                    if let Err(e) = active.send(&command).await {
                        send_event(out_tx, SessionEvent::error(e.to_string()));
                    }
                }
            }
            HostRequest::Ping => match client.as_mut() {
                Some(active) => {
                    if let Err(e) = active.send(&ClientCommand::Ping).await {
                        send_event(out_tx, SessionEvent::error(e.to_string()));
                    }
                }
                None => send_event(out_tx, SessionEvent::Pong),
            },
            HostRequest::Close => {
                info!("extension requested close");
                if let Some(active) = client.take() {
                    active.close().await;
                }
                send_event(out_tx, SessionEvent::Exit { code: Some(0) });
                return;
            }
        }
    }
}

fn send_event(out_tx: &UnboundedSender<Value>, event: SessionEvent) {
    match serde_json::to_value(&event) {
        Ok(value) => {
            let _ = out_tx.send(value);
        }
        Err(e) => warn!(error = %e, "failed to encode event"),
    }
}

/// The bridge's attachment to one session daemon.
struct DaemonClient {
    session: String,
    sender: RecordSender,
    reader_task: JoinHandle<()>,
}

impl DaemonClient {
    /// Attach to the named session, spawning its daemon if necessary, and
    /// start forwarding every daemon record to the extension unchanged.
    async fn connect_or_spawn(
        paths: &Paths,
        session: &str,
        shell: Option<&str>,
        cols: u16,
        rows: u16,
        out_tx: UnboundedSender<Value>,
    ) -> RendezvousResult<Self> {
        let channel = ensure_session(paths, session, shell, cols, rows, DEFAULT_TIMEOUT).await?;
        let (mut receiver, sender) = channel.into_split();

        let forwarded_session = session.to_string();
        let reader_task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(Some(record)) => {
                        if out_tx.send(record).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(session = %forwarded_session, error = %e, "daemon channel error");
                        break;
                    }
                }
            }
            debug!(session = %forwarded_session, "daemon reader finished");
        });

        info!(session, "attached to session daemon");
        Ok(Self {
            session: session.to_string(),
            sender,
            reader_task,
        })
    }

    async fn send(&mut self, command: &ClientCommand) -> session_ipc::IpcResult<()> {
        self.sender.send(command).await
    }

    /// Drop the attachment without touching the daemon.
    fn detach(self) {
        debug!(session = %self.session, "detaching from session daemon");
        self.reader_task.abort();
    }

    /// Ask the daemon to tear the whole session down, then drop.
    async fn close(mut self) {
        let _ = self.sender.send(&ClientCommand::Close).await;
        debug!(session = %self.session, "sent close to session daemon");
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    /// Frame a sequence of messages the way the extension would.
    async fn framed(messages: &[Value]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for message in messages {
            framing::write_message(&mut bytes, message).await.unwrap();
        }
        bytes
    }

    /// Run the inbound loop over a canned stdin and collect every message
    /// the bridge would have framed back to the extension.
    async fn drive(input: Vec<u8>) -> Vec<Value> {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel();

        let mut stdin = input.as_slice();
        inbound_loop(&paths, &mut stdin, &out_tx).await;
        drop(out_tx);

        let mut replies = Vec::new();
        while let Some(message) = out_rx.recv().await {
            replies.push(message);
        }
        replies
    }

    #[tokio::test]
    async fn ping_without_open_pongs_locally() {
        let replies = drive(framed(&[json!({"type": "ping"})]).await).await;
        assert_eq!(replies, vec![json!({"type": "pong"})]);
    }

    #[tokio::test]
    async fn unknown_type_is_reported() {
        let replies = drive(framed(&[json!({"type": "reboot"})]).await).await;
        assert_eq!(replies, vec![json!({"type": "error", "message": "unknown"})]);
    }

    #[tokio::test]
    async fn stdin_before_open_is_an_error() {
        let replies =
            drive(framed(&[json!({"type": "stdin", "data_b64": "aGk="})]).await).await;
        assert_eq!(
            replies,
            vec![json!({"type": "error", "message": "stdin before open"})]
        );
    }

    #[tokio::test]
    async fn close_acknowledges_with_exit_zero() {
        let replies = drive(
            framed(&[json!({"type": "close"}), json!({"type": "ping"})]).await,
        )
        .await;
        // The loop ends at close; the trailing ping is never read.
        assert_eq!(replies, vec![json!({"type": "exit", "code": 0})]);
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_and_skipped() {
        let mut input = Vec::new();
        input.extend_from_slice(&(7u32).to_le_bytes());
        input.extend_from_slice(b"not js}");
        input.extend_from_slice(&framed(&[json!({"type": "ping"})]).await);

        let replies = drive(input).await;
        assert_eq!(
            replies,
            vec![
                json!({"type": "error", "message": "invalid message"}),
                json!({"type": "pong"}),
            ]
        );
    }

    #[tokio::test]
    async fn resize_without_open_is_silently_tracked() {
        let replies = drive(
            framed(&[
                json!({"type": "resize", "cols": 120, "rows": 40}),
                json!({"type": "ping"}),
            ])
            .await,
        )
        .await;
        assert_eq!(replies, vec![json!({"type": "pong"})]);
    }

    #[tokio::test]
    async fn eof_ends_the_loop_quietly() {
        let replies = drive(Vec::new()).await;
        assert!(replies.is_empty());
    }
}
