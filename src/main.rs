//! Tachyon - unified CLI entrypoint.
//!
//! Usage:
//!   tachyon start --config config/tachyon.toml
//!   tachyon check --config config/tachyon.toml

use anyhow::Result;
use clap::Parser;
use tachyon::cli::commands::{run_check, run_start};
use tachyon::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args).await,
        Commands::Check(args) => run_check(args),
    }
}
