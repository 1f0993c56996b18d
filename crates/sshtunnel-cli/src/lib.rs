//! `ssh-tunnel` command surface
//!
//! Argument parsing, connection profiles, logging setup and the command
//! implementations behind the `ssh-tunnel` binary.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod profile;

pub use cli::{Cli, Commands};
pub use commands::{run, Instance, RelaySpec};
pub use logging::init_logging;
pub use profile::{ProfileFile, ResolvedProfile};
