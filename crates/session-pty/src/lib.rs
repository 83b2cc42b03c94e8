//! Cross-platform PTY ownership for session daemons.
//!
//! One `PtyShell` owns one interactive child shell and the master side of
//! its terminal. Three backends exist behind the same byte-stream surface:
//! a POSIX pty, a Windows pseudo-console (both via portable-pty), and a
//! Windows anonymous-pipe fallback for hosts where the pseudo-console
//! cannot be opened. The variant is chosen once, at spawn time, and
//! reported as the session's platform tag.

mod error;

pub use error::{PtyError, PtyResult};

use host_config_and_utils::{default_shell, home_dir};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use session_protocol_types::Platform;
use std::io::Read;
#[cfg(not(windows))]
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
#[cfg(unix)]
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a POSIX child gets after SIGTERM before SIGKILL.
#[cfg(unix)]
const TERM_GRACE: Duration = Duration::from_secs(2);
/// Poll interval while waiting out the grace period.
#[cfg(unix)]
const TERM_POLL: Duration = Duration::from_millis(50);

/// A spawned interactive shell behind a terminal-shaped byte stream.
///
/// Reads block until output arrives (or EOF); writes and resizes are
/// best-effort; `close` is idempotent and tears the whole process group
/// down.
pub struct PtyShell {
    shell: String,
    platform: Platform,
    size: Mutex<(u16, u16)>,
    closed: AtomicBool,
    backend: Backend,
}

enum Backend {
    /// POSIX pty or Windows pseudo-console.
    Console(ConsoleBackend),
    /// Anonymous-pipe child, Windows only. No resize capability.
    #[cfg(windows)]
    Pipe(PipeBackend),
}

struct ConsoleBackend {
    /// Dropped on close; releasing the master fd is what EOFs the reader.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    reader: Mutex<Box<dyn Read + Send>>,
    writer: Mutex<Option<Box<dyn std::io::Write + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    /// portable-pty starts the child as a session leader, so signalling the
    /// group reaches the shell and everything it spawned.
    #[cfg(unix)]
    pgid: i32,
}

impl PtyShell {
    /// Spawn `shell` (or the platform default) in a fresh terminal of
    /// `cols` x `rows`, working directory set to the user's home.
    pub fn spawn(shell: Option<String>, cols: u16, rows: u16) -> PtyResult<Self> {
        let shell = shell.unwrap_or_else(default_shell);

        match Self::spawn_console(&shell, cols, rows) {
            Ok(backend) => {
                let platform = if cfg!(windows) {
                    Platform::WinPty
                } else {
                    Platform::PosixPty
                };
                debug!(shell = %shell, %platform, "pty spawned");
                Ok(Self {
                    shell,
                    platform,
                    size: Mutex::new((cols, rows)),
                    closed: AtomicBool::new(false),
                    backend: Backend::Console(backend),
                })
            }
            #[cfg(windows)]
            Err(err) => {
                warn!(error = %err, "pseudo-console unavailable, falling back to pipes");
                let backend = PipeBackend::spawn(&shell)?;
                Ok(Self {
                    shell,
                    platform: Platform::WinPipe,
                    size: Mutex::new((cols, rows)),
                    closed: AtomicBool::new(false),
                    backend: Backend::Pipe(backend),
                })
            }
            #[cfg(not(windows))]
            Err(err) => Err(err),
        }
    }

    fn spawn_console(shell: &str, cols: u16, rows: u16) -> PtyResult<ConsoleBackend> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Spawn(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(shell);
        #[cfg(unix)]
        cmd.arg("-l");
        cmd.cwd(home_dir());

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        #[cfg(unix)]
        let pgid = pair
            .master
            .process_group_leader()
            .or_else(|| child.process_id().map(|pid| pid as i32))
            .ok_or_else(|| PtyError::Spawn("could not determine child process group".into()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(format!("take_writer: {e}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(format!("clone_reader: {e}")))?;

        // The master alone keeps the terminal open.
        drop(pair.slave);

        Ok(ConsoleBackend {
            master: Mutex::new(Some(pair.master)),
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(child),
            #[cfg(unix)]
            pgid,
        })
    }

    /// The shell actually running in this terminal.
    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Which backend variant spawn ended up with.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Current terminal dimensions as (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        *lock(&self.size)
    }

    /// Read up to `max` bytes of terminal output. Blocks until output
    /// arrives; returns an empty buffer on EOF or on a read error (errors
    /// are logged, not surfaced — consumers treat output as opaque bytes).
    pub fn read_chunk(&self, max: usize) -> Vec<u8> {
        match &self.backend {
            Backend::Console(console) => {
                let mut buf = vec![0u8; max];
                let mut reader = lock(&console.reader);
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => return Vec::new(),
                        Ok(n) => {
                            buf.truncate(n);
                            return buf;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Vec::new(),
                        Err(e) => {
                            debug!(error = %e, "pty read failed");
                            return Vec::new();
                        }
                    }
                }
            }
            #[cfg(windows)]
            Backend::Pipe(pipe) => pipe.read_chunk(),
        }
    }

    /// Push raw input at the shell. Failures are logged and swallowed.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let outcome = match &self.backend {
            Backend::Console(console) => {
                let mut guard = lock(&console.writer);
                match guard.as_mut() {
                    Some(writer) => write_console(writer.as_mut(), data),
                    None => Ok(()),
                }
            }
            #[cfg(windows)]
            Backend::Pipe(pipe) => pipe.write(data),
        };
        if let Err(e) = outcome {
            warn!(error = %e, "pty write failed");
        }
    }

    /// Update the terminal size. A no-op beyond bookkeeping on the
    /// anonymous-pipe fallback.
    pub fn resize(&self, cols: u16, rows: u16) {
        *lock(&self.size) = (cols, rows);
        if let Backend::Console(console) = &self.backend {
            if let Some(master) = lock(&console.master).as_ref() {
                if let Err(e) = master.resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                }) {
                    warn!(error = %e, cols, rows, "pty resize failed");
                }
            }
        }
    }

    /// The child's exit code, if it has exited.
    pub fn poll_exit_code(&self) -> Option<i32> {
        match &self.backend {
            Backend::Console(console) => {
                let mut child = lock(&console.child);
                match child.try_wait() {
                    Ok(Some(status)) => Some(status.exit_code() as i32),
                    Ok(None) => None,
                    Err(e) => {
                        debug!(error = %e, "try_wait failed");
                        None
                    }
                }
            }
            #[cfg(windows)]
            Backend::Pipe(pipe) => pipe.poll_exit_code(),
        }
    }

    /// Terminate the child and release the terminal. Idempotent; every
    /// sub-step is best-effort.
    ///
    /// POSIX: SIGTERM to the process group, up to two seconds of 50 ms
    /// polls, then SIGKILL if the shell is still alive. Windows: kill the
    /// child outright.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(shell = %self.shell, platform = %self.platform, "closing pty");
        match &self.backend {
            Backend::Console(console) => {
                #[cfg(unix)]
                self.terminate_group(console);
                #[cfg(windows)]
                if let Err(e) = lock(&console.child).kill() {
                    warn!(error = %e, "failed to kill pseudo-console child");
                }
                // Dropping the writer and master closes the terminal, which
                // EOFs any blocked reader.
                lock(&console.writer).take();
                lock(&console.master).take();
            }
            #[cfg(windows)]
            Backend::Pipe(pipe) => pipe.close(),
        }
    }

    #[cfg(unix)]
    fn terminate_group(&self, console: &ConsoleBackend) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(console.pgid);
        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            debug!(error = %e, pgid = console.pgid, "SIGTERM delivery failed");
        }

        let deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < deadline {
            if self.poll_exit_code().is_some() {
                return;
            }
            std::thread::sleep(TERM_POLL);
        }

        warn!(pgid = console.pgid, "child ignored SIGTERM, escalating");
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            debug!(error = %e, pgid = console.pgid, "SIGKILL delivery failed");
        }
    }
}

/// The pseudo-console input pipe carries text, so bytes are decoded lossily
/// before the write; POSIX masters take the bytes as-is.
#[cfg(windows)]
fn write_console(writer: &mut dyn std::io::Write, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let text = String::from_utf8_lossy(data);
    writer.write_all(text.as_bytes())?;
    writer.flush()
}

#[cfg(not(windows))]
fn write_console(writer: &mut dyn Write, data: &[u8]) -> std::io::Result<()> {
    writer.write_all(data)?;
    writer.flush()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Anonymous-pipe fallback. stdout and stderr are pumped by two OS threads
/// into one channel so consumers still see a single merged stream.
#[cfg(windows)]
struct PipeBackend {
    child: Mutex<std::process::Child>,
    stdin: Mutex<Option<std::process::ChildStdin>>,
    output: Mutex<std::sync::mpsc::Receiver<Vec<u8>>>,
}

#[cfg(windows)]
impl PipeBackend {
    fn spawn(shell: &str) -> PtyResult<Self> {
        use std::process::{Command, Stdio};

        let mut child = Command::new(shell)
            .current_dir(home_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PtyError::Spawn("child stdout missing".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PtyError::Spawn("child stderr missing".into()))?;

        let (tx, rx) = std::sync::mpsc::channel::<Vec<u8>>();
        let tx_err = tx.clone();
        std::thread::Builder::new()
            .name("pty-pipe-stdout".into())
            .spawn(move || pump(stdout, tx))
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        std::thread::Builder::new()
            .name("pty-pipe-stderr".into())
            .spawn(move || pump(stderr, tx_err))
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            output: Mutex::new(rx),
        })
    }

    fn read_chunk(&self) -> Vec<u8> {
        // Both pump threads gone means both pipes hit EOF.
        match lock(&self.output).recv() {
            Ok(chunk) => chunk,
            Err(_) => Vec::new(),
        }
    }

    fn write(&self, data: &[u8]) -> std::io::Result<()> {
        use std::io::Write;
        if let Some(stdin) = lock(&self.stdin).as_mut() {
            stdin.write_all(data)?;
            stdin.flush()?;
        }
        Ok(())
    }

    fn poll_exit_code(&self) -> Option<i32> {
        match lock(&self.child).try_wait() {
            Ok(Some(status)) => status.code(),
            _ => None,
        }
    }

    fn close(&self) {
        if let Err(e) = lock(&self.child).kill() {
            debug!(error = %e, "failed to kill pipe child");
        }
        lock(&self.stdin).take();
    }
}

#[cfg(windows)]
fn pump(mut reader: impl Read, tx: std::sync::mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const TEST_SHELL: &str = "/bin/sh";
    const READ_DEADLINE: Duration = Duration::from_secs(10);

    fn spawn_sh() -> PtyShell {
        PtyShell::spawn(Some(TEST_SHELL.to_string()), 80, 24).expect("spawn /bin/sh")
    }

    /// Read output until `needle` shows up or the deadline passes.
    fn read_until(pty: &PtyShell, needle: &[u8]) -> Vec<u8> {
        let deadline = Instant::now() + READ_DEADLINE;
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            let chunk = pty.read_chunk(8192);
            if chunk.is_empty() {
                if pty.poll_exit_code().is_some() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            seen.extend_from_slice(&chunk);
            if seen.windows(needle.len()).any(|w| w == needle) {
                break;
            }
        }
        seen
    }

    #[test]
    fn spawn_reports_posix_platform() {
        let pty = spawn_sh();
        assert_eq!(pty.platform(), Platform::PosixPty);
        assert_eq!(pty.shell(), TEST_SHELL);
        assert_eq!(pty.size(), (80, 24));
        pty.close();
    }

    #[test]
    fn echo_roundtrip() {
        let pty = spawn_sh();
        pty.write(b"printf 'rit:%s\\n' marker\n");
        let seen = read_until(&pty, b"rit:marker");
        assert!(
            seen.windows(10).any(|w| w == b"rit:marker"),
            "marker not seen in {:?}",
            String::from_utf8_lossy(&seen)
        );
        pty.close();
    }

    #[test]
    fn exit_is_observed() {
        let pty = spawn_sh();
        pty.write(b"exit 7\n");
        let deadline = Instant::now() + READ_DEADLINE;
        let mut code = None;
        while Instant::now() < deadline {
            code = pty.poll_exit_code();
            if code.is_some() {
                break;
            }
            // Drain output so the shell is not blocked on a full buffer.
            let _ = pty.read_chunk(8192);
        }
        assert_eq!(code, Some(7));
        pty.close();
    }

    #[test]
    fn close_is_idempotent() {
        let pty = spawn_sh();
        pty.close();
        let first_exit = pty.poll_exit_code();
        pty.close();
        assert_eq!(pty.poll_exit_code(), first_exit);
    }

    #[test]
    fn resize_updates_bookkeeping() {
        let pty = spawn_sh();
        pty.resize(120, 40);
        assert_eq!(pty.size(), (120, 40));
        pty.close();
    }

    #[test]
    fn write_after_close_is_swallowed() {
        let pty = spawn_sh();
        pty.close();
        pty.write(b"echo nope\n");
    }
}
