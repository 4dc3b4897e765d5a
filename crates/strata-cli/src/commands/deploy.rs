//! Deploy command

use clap::Args;
use strata_common::config::StackConfig;
use strata_common::engine::{
    create_client, ExportedValue, KubeEngine, KubeEngineConfig, RecordingEngine,
};
use strata_common::graph::DeployedResources;
use strata_infra::deploy_stack;
use tracing::{error, info};

use super::exports_json;
use crate::{GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Record the deployment in memory instead of touching the cluster
    #[arg(long)]
    pub dry_run: bool,

    /// Print secret exports in clear text
    #[arg(long)]
    pub show_secrets: bool,
}

pub async fn run(args: DeployArgs, global: &GlobalArgs, config: &StackConfig) -> Result<()> {
    let (outcome, exports) = if args.dry_run {
        info!("dry run, nothing is applied to the cluster");
        let engine = RecordingEngine::new();
        let outcome = deploy_stack(&engine, config).await;
        (outcome, engine.exports())
    } else {
        let client = create_client(global.kubeconfig.as_deref()).await?;
        let engine = KubeEngine::new(
            client,
            KubeEngineConfig {
                field_manager: config.field_manager.clone(),
                apply_timeout: config.apply_timeout(),
                kubeconfig: global.kubeconfig.clone(),
                ..Default::default()
            },
        )
        .await?;
        let outcome = deploy_stack(&engine, config).await;
        (outcome, engine.exports())
    };

    report(outcome, &exports, args.show_secrets)
}

fn report(
    outcome: strata_common::Result<DeployedResources>,
    exports: &[ExportedValue],
    show_secrets: bool,
) -> Result<()> {
    if !exports.is_empty() {
        println!("{}", serde_json::to_string_pretty(&exports_json(exports, show_secrets))?);
    }

    match outcome {
        Ok(deployed) => {
            info!(
                run_id = %deployed.run_id,
                resources = deployed.handles.len(),
                exports = deployed.exports.len(),
                "deployment complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "deployment failed");
            Err(e.into())
        }
    }
}
