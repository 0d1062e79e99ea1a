//! Command implementations for the CLI.

mod send;
mod shutdown;
mod target;

pub use send::{SendArgs, cmd_send, cmd_sleep};
pub use shutdown::cmd_shutdown;
pub use target::cmd_target;
