//! One-shot Gerrit commands.
//!
//! Provides:
//! - `GerritCommand` - Builds quoted `gerrit ...` command lines
//! - `CommandExecutor` - Runs a command to completion on a fresh session

pub mod command;
pub mod executor;

pub use command::{CommandError, GerritCommand};
pub use executor::{CommandExecutor, ExecError};
