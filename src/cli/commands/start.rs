//! Start command - launches the broker.

use crate::cli::args::StartArgs;
use crate::core::config::Config;
use crate::core::runtime::{init_tracing, Broker};
use anyhow::Result;

pub async fn run_start(args: StartArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    config.validate()?;
    init_tracing(&config.telemetry.log_filter);
    Broker::new(config).run().await
}
