//! Whole-stack planning
//!
//! The graph is assembled in a fixed order: cert-manager, the CA issuer,
//! Valkey, Dragonfly, then the Dragonfly operator. Workloads switched off in
//! the configuration are left out entirely.

use strata_common::config::StackConfig;
use strata_common::engine::ResourceEngine;
use strata_common::graph::{DeployedResources, Orchestrator, ResourceGraph};
use strata_common::Result;
use tracing::info;

use crate::bootstrap::cert_manager::CertManagerDeployer;
use crate::bootstrap::dragonfly::DragonflyDeployer;
use crate::bootstrap::dragonfly_operator::DragonflyOperatorDeployer;
use crate::bootstrap::issuer::IssuerProvisioner;
use crate::bootstrap::valkey::ValkeyDeployer;
use crate::pki::{BootstrapConfig, CertificateBootstrap, Environment, TrustMaterial};

/// Build the resource graph for `config`, rooted in `trust`
pub fn plan_stack(config: &StackConfig, trust: &TrustMaterial) -> Result<ResourceGraph> {
    config.validate()?;
    let mut graph = ResourceGraph::new();

    let cert_manager = CertManagerDeployer::new(&config.cert_manager, config.local)?.plan(&mut graph)?;
    let issuer = IssuerProvisioner::new(&config.cert_manager)?.plan(&mut graph, trust, &cert_manager)?;

    if config.valkey.enabled {
        ValkeyDeployer::new(&config.valkey)?.plan(&mut graph, &issuer)?;
    }
    if config.dragonfly.enabled {
        DragonflyDeployer::new(&config.dragonfly)?.plan(&mut graph, &issuer)?;
    }
    if config.dragonfly_operator.enabled {
        DragonflyOperatorDeployer::new(&config.dragonfly_operator)?.plan(&mut graph)?;
    }

    info!(
        resources = graph.len(),
        exports = graph.exports().len(),
        "planned stack"
    );
    Ok(graph)
}

/// Bootstrap trust material, plan the stack and deploy it through `engine`
pub async fn deploy_stack<E: ResourceEngine + ?Sized>(
    engine: &E,
    config: &StackConfig,
) -> Result<DeployedResources> {
    let bootstrap = CertificateBootstrap::new(BootstrapConfig::from(&config.cert_manager));
    let trust = bootstrap
        .load_or_generate(engine, Environment::from_local_flag(config.local))
        .await?;
    let graph = plan_stack(config, &trust)?;
    Orchestrator::new(engine).deploy(&graph).await
}
