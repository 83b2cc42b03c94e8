//! Spawning a detached session daemon: the same executable re-invoked with
//! the daemon-mode argv.

use crate::RendezvousResult;
use session_protocol_types::SHELL_PLACEHOLDER;
use std::process::{Command, Stdio};
use tracing::debug;

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Start `<current-exe> --session-daemon <name> <shell|_> <cols> <rows>`
/// detached from this process.
///
/// On Windows the creation flags detach the child; on POSIX the child
/// performs its own double-fork, so the process spawned here exits almost
/// immediately and only the grandchild survives.
pub fn spawn_detached(name: &str, shell: Option<&str>, cols: u16, rows: u16) -> RendezvousResult<()> {
    let exe = std::env::current_exe()?;
    let mut command = Command::new(exe);
    command
        .arg("--session-daemon")
        .arg(name)
        .arg(shell.unwrap_or(SHELL_PLACEHOLDER))
        .arg(cols.to_string())
        .arg(rows.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    #[allow(unused_mut)]
    let mut child = command.spawn()?;
    debug!(name, pid = child.id(), "spawned detached daemon candidate");

    // On POSIX the direct child exits as soon as it has forked the real
    // daemon; reap it in the background so it does not linger as a zombie.
    #[cfg(unix)]
    std::thread::spawn(move || {
        let _ = child.wait();
    });

    Ok(())
}
