//! Tachyon CLI - unified command-line interface.
//!
//! Provides a single binary entry point for:
//! - `tachyon start` - Start the broker
//! - `tachyon check` - Validate configuration

mod args;
pub mod commands;

pub use args::{CheckArgs, Cli, Commands, StartArgs};
