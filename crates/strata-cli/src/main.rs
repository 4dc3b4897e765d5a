//! Strata CLI
//!
//! Deploys the cache stack (cert-manager, internal CA, Valkey, Dragonfly) to a
//! Kubernetes cluster.

use clap::Parser;

use strata_cli::Cli;
use strata_common::telemetry::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.log_format)?;
    cli.run().await?;
    Ok(())
}
