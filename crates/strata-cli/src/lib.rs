//! Strata CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use strata_common::telemetry::LogFormat;

/// Strata - cache stack deployment for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Stack configuration file (YAML); built-in defaults when omitted
    #[arg(long, env = "STRATA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Target a local cluster: self-signed CA, no Gateway API
    #[arg(long, env = "STRATA_LOCAL", global = true)]
    pub local: bool,

    /// Kubeconfig to use instead of the default lookup
    #[arg(long, env = "STRATA_KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Log output format (text or json)
    #[arg(long, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the stack and print its exports
    Deploy(commands::deploy::DeployArgs),
    /// Show the resources a deployment would apply, in order
    Plan(commands::plan::PlanArgs),
    /// Print the ACL file compiled for a workload
    RenderAcl(commands::render_acl::RenderAclArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = config::resolve(&self.global)?;
        match self.command {
            Commands::Deploy(args) => commands::deploy::run(args, &self.global, &config).await,
            Commands::Plan(args) => commands::plan::run(args, &config).await,
            Commands::RenderAcl(args) => commands::render_acl::run(args, &config),
        }
    }
}
