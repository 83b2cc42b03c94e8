//! POSIX daemonization.
//!
//! Double fork + `setsid` + stdio redirected to `/dev/null`. Without this
//! the daemon stays in the bridge's controlling-terminal group and dies
//! with it when the browser disconnects. Must run before the async runtime
//! exists — forking a process with live runtime threads is not survivable.

use std::os::fd::AsRawFd;

/// Detach the current process from its parent. The original process and
/// the intermediate child both exit inside this call; only the grandchild
/// returns.
pub fn daemonize() -> std::io::Result<()> {
    use nix::unistd::{dup2, fork, setsid, ForkResult};

    match unsafe { fork() }.map_err(io_err)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(io_err)?;

    match unsafe { fork() }.map_err(io_err)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    // The daemon keeps no stdio; anything it has to say goes to the log.
    let devnull = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    let fd = devnull.as_raw_fd();
    for stdio in 0..=2 {
        dup2(fd, stdio).map_err(io_err)?;
    }
    Ok(())
}

fn io_err(errno: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(errno as i32)
}
