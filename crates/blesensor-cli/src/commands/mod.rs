//! Command implementations for the CLI.

mod check;
mod watch;

pub use check::cmd_check;
pub use watch::cmd_watch;
