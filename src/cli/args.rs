//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Tachyon - STOMP message broker.
#[derive(Parser)]
#[command(name = "tachyon")]
#[command(version)]
#[command(about = "Tachyon STOMP broker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the broker
    Start(StartArgs),

    /// Validate a configuration file and exit
    Check(CheckArgs),
}

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tachyon.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tachyon.toml")]
    pub config: PathBuf,
}
