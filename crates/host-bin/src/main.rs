//! run-in-terminal native host.
//!
//! With no arguments this is the native-messaging bridge the browser
//! spawns; with `--session-daemon NAME SHELL COLS ROWS` it is the detached
//! per-session daemon the bridge spawns. Both roles share one executable so
//! the rendezvous can re-invoke `current_exe`.

mod bridge;
mod daemon;

use clap::Parser;
use host_config_and_utils::{init_logging, Paths};
use session_protocol_types::SHELL_PLACEHOLDER;

/// Native-messaging host for the run-in-terminal browser extension.
#[derive(Parser)]
#[command(name = "run-in-terminal-host", version)]
#[command(about = "Native-messaging host bridging a browser extension to persistent shell sessions")]
struct Cli {
    /// Run as a detached session daemon instead of a bridge.
    /// SHELL may be `_` for the platform default.
    #[arg(long, num_args = 4, value_names = ["NAME", "SHELL", "COLS", "ROWS"])]
    session_daemon: Option<Vec<String>>,

    /// Log level when RIT_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(args) = cli.session_daemon {
        return daemon_main(args, &cli.log_level);
    }

    let paths = Paths::new()?;
    let _log_guard = init_logging(&paths, &cli.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(bridge::run(paths))
}

fn daemon_main(args: Vec<String>, log_level: &str) -> anyhow::Result<()> {
    // clap enforces the argument count; mirror its exit code for values
    // that do not parse.
    let [name, shell_token, raw_cols, raw_rows]: [String; 4] = match args.try_into() {
        Ok(args) => args,
        Err(_) => std::process::exit(2),
    };
    let cols: u16 = raw_cols.parse().unwrap_or_else(|_| std::process::exit(2));
    let rows: u16 = raw_rows.parse().unwrap_or_else(|_| std::process::exit(2));
    let shell = (shell_token != SHELL_PLACEHOLDER).then_some(shell_token);

    // Detach before the runtime or any thread exists; forking later is not
    // survivable. The parent and intermediate processes exit in here.
    #[cfg(unix)]
    daemon::detach::daemonize()?;

    let paths = Paths::new()?;
    let _log_guard = init_logging(&paths, log_level);
    tracing::info!(name = %name, cols, rows, "daemon process started");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(daemon::run(paths, name, shell, cols, rows))
}
