//! Storage paths, logging bootstrap, and shared utilities for the
//! run-in-terminal native host.

mod error;
mod logging;
mod paths;
mod shell;

pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, LOG_FILTER_ENV};
pub use paths::{home_dir, Paths, STATE_DIR_ENV};
pub use shell::default_shell;
