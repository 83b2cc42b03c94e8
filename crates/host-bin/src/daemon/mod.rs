//! The session daemon: single owner of one PTY, serving every bridge that
//! authenticates against its published coordinates.
//!
//! Thread/task shape: the caller's task runs the accept loop; one dedicated
//! OS thread reads the PTY and broadcasts; each bridge connection gets a
//! command-handling task plus a writer task draining its outbound queue.
//! The PTY reader is the sole emitter of `data` and `exit`, so every
//! attached bridge observes the same output sequence in the same order.

#[cfg(unix)]
pub mod detach;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use host_config_and_utils::Paths;
use serde_json::Value;
use session_ipc::{IpcError, RecordChannel};
use session_protocol_types::{AuthKey, ClientCommand, SessionCoordinates, SessionEvent};
use session_pty::PtyShell;
use session_rendezvous::{remove_info, write_info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Read size for PTY output chunks.
const PTY_CHUNK: usize = 8192;
/// Idle pause between empty POSIX reads that do not yet mean EOF.
const PTY_IDLE: Duration = Duration::from_millis(20);

/// Bring up a session daemon and serve until `close` or PTY exit.
///
/// Publication order is load-bearing: the info file is written only after
/// the listener is bound *and* the PTY spawned, so coordinates on disk
/// always describe a daemon that made it through startup. A PTY spawn
/// failure aborts before publication.
pub async fn run(
    paths: Paths,
    name: String,
    shell: Option<String>,
    cols: u16,
    rows: u16,
) -> anyhow::Result<()> {
    let authkey = AuthKey::generate();
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;

    let pty = PtyShell::spawn(shell, cols, rows)?;
    info!(
        name = %name,
        port = addr.port(),
        platform = %pty.platform(),
        shell = pty.shell(),
        "session daemon starting"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = Arc::new(SessionServer {
        shell_label: pty.shell().to_string(),
        name,
        paths,
        pty: Arc::new(pty),
        authkey,
        clients: Mutex::new(HashMap::new()),
        next_client_id: AtomicU64::new(1),
        stopped: AtomicBool::new(false),
        shutdown_tx,
    });

    let coords = SessionCoordinates::new(&server.name, "127.0.0.1", addr.port(), &server.authkey);
    write_info(&server.paths, &coords)?;

    let reader = server.clone();
    let thread_name = format!("pty-reader-{}", server.name);
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || reader.pty_reader_loop())?;

    server.clone().accept_loop(listener, shutdown_rx).await;

    let closer = server.clone();
    tokio::task::spawn_blocking(move || closer.close()).await?;
    Ok(())
}

/// State shared by every task of one session daemon.
pub struct SessionServer {
    name: String,
    /// The resolved shell path, echoed in `ready` and `info` events.
    shell_label: String,
    paths: Paths,
    pty: Arc<PtyShell>,
    authkey: AuthKey,
    clients: Mutex<HashMap<u64, UnboundedSender<Value>>>,
    next_client_id: AtomicU64,
    stopped: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl SessionServer {
    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(name = %self.name, "accepting bridge connections");
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        tokio::spawn(async move { server.serve_client(stream, peer).await });
                    }
                    Err(e) => {
                        warn!(name = %self.name, error = %e, "accept failed");
                        continue;
                    }
                },
                _ = shutdown_rx.recv() => break,
            }
        }
        info!(name = %self.name, "accept loop ended");
    }

    async fn serve_client(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let channel = match RecordChannel::accept(stream, &self.authkey).await {
            Ok(channel) => channel,
            Err(e) => {
                debug!(name = %self.name, %peer, error = %e, "rejected connection");
                return;
            }
        };
        let (mut receiver, mut sender) = channel.into_split();

        // Per-client outbound queue. A dedicated writer task drains it, so
        // broadcasts never block on one slow bridge, and everything queued
        // for this channel goes out in enqueue order.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if sender.send(&record).await.is_err() {
                    break;
                }
            }
        });

        // `ready` is queued before the channel joins the broadcast set, so
        // it precedes every `data` this client will see.
        let ready = SessionEvent::Ready {
            session: self.name.clone(),
            platform: self.pty.platform(),
            shell: self.shell_label.clone(),
        };
        if tx.send(to_value(ready)).is_err() {
            return;
        }

        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.clients).insert(id, tx.clone());
        info!(name = %self.name, client = id, %peer, "bridge attached");

        while !self.stopped() {
            match receiver.recv().await {
                Ok(Some(record)) => match ClientCommand::from_value(&record) {
                    Some(ClientCommand::Close) => {
                        info!(name = %self.name, client = id, "close requested");
                        let server = Arc::clone(&self);
                        let _ = tokio::task::spawn_blocking(move || server.close()).await;
                        break;
                    }
                    Some(command) => self.handle_command(id, command, &tx),
                    // Unknown records are ignored, never fatal.
                    None => continue,
                },
                Ok(None) => break,
                Err(IpcError::Json(e)) => {
                    debug!(client = id, error = %e, "ignoring undecodable record");
                    continue;
                }
                Err(e) => {
                    debug!(client = id, error = %e, "channel error");
                    break;
                }
            }
        }

        lock(&self.clients).remove(&id);
        info!(name = %self.name, client = id, "bridge detached");
    }

    /// Per-client commands; `close` is handled by the caller because it
    /// tears down the whole server.
    fn handle_command(&self, id: u64, command: ClientCommand, tx: &UnboundedSender<Value>) {
        match command {
            ClientCommand::Stdin { data_b64 } => match BASE64.decode(data_b64.as_bytes()) {
                Ok(bytes) => self.pty.write(&bytes),
                Err(e) => debug!(client = id, error = %e, "ignoring stdin with bad base64"),
            },
            ClientCommand::Resize { cols, rows } => {
                let (current_cols, current_rows) = self.pty.size();
                self.pty
                    .resize(cols.unwrap_or(current_cols), rows.unwrap_or(current_rows));
            }
            ClientCommand::Ping => {
                let _ = tx.send(to_value(SessionEvent::Pong));
            }
            ClientCommand::Info => {
                let _ = tx.send(to_value(SessionEvent::Info {
                    session: self.name.clone(),
                    platform: self.pty.platform(),
                    shell: self.shell_label.clone(),
                    pid: std::process::id(),
                }));
            }
            ClientCommand::Close => {}
        }
    }

    /// Dedicated-thread loop: read PTY output and fan it out until the
    /// stream ends, then broadcast the single `exit` event and shut the
    /// daemon down.
    fn pty_reader_loop(self: Arc<Self>) {
        while !self.stopped() {
            let chunk = self.pty.read_chunk(PTY_CHUNK);
            if chunk.is_empty() {
                // On POSIX an empty read can be transient; only a reaped
                // exit code is conclusive there.
                if self.pty.poll_exit_code().is_some() || self.pty.platform().eof_is_conclusive() {
                    break;
                }
                std::thread::sleep(PTY_IDLE);
                continue;
            }
            self.broadcast(to_value(SessionEvent::data(&chunk)));
        }

        let code = self.pty.poll_exit_code();
        self.broadcast(to_value(SessionEvent::Exit { code }));
        info!(name = %self.name, ?code, "pty reader ended");
        self.close();
    }

    /// Best-effort fan-out. A channel whose queue is gone is pruned.
    fn broadcast(&self, record: Value) {
        let mut clients = lock(&self.clients);
        clients.retain(|_, tx| tx.send(record.clone()).is_ok());
    }

    /// Idempotent teardown: stop flag, unblock the accept loop, tell every
    /// bridge to close, kill the PTY, withdraw the publication.
    pub fn close(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(name = %self.name, "session daemon closing");

        let _ = self.shutdown_tx.send(());

        let close_record = serde_json::json!({ "cmd": "close" });
        let clients = std::mem::take(&mut *lock(&self.clients));
        for (id, tx) in clients {
            if tx.send(close_record.clone()).is_err() {
                debug!(name = %self.name, client = id, "client queue already gone");
            }
            // Dropping the sender here ends the client's writer task once
            // the queue drains, which closes its socket.
        }

        self.pty.close();
        remove_info(&self.paths, &self.name);
        info!(name = %self.name, "session daemon closed");
    }
}

fn to_value(event: SessionEvent) -> Value {
    serde_json::to_value(&event).unwrap_or(Value::Null)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
