//! cert-manager chart planning
//!
//! Installs cert-manager from the jetstack repository with highly available
//! controller, cainjector and webhook deployments, JSON logging and leader
//! election pinned to the release namespace.

use serde::Serialize;
use strata_common::config::CertManagerConfig;
use strata_common::graph::ResourceGraph;
use strata_common::resource::{ChartSpec, ExportSource, ResourceId, ResourceNode};
use strata_common::{Error, Result};
use tracing::debug;

use super::{insert_namespace, to_value};

/// Release name of the cert-manager chart
pub const RELEASE_NAME: &str = "cert-manager";

const APP: &str = "cert-manager";

/// Leader election lease location
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LeaderElection {
    /// Namespace holding the lease
    pub namespace: String,
}

/// Chart-wide settings
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalValues {
    /// Leader election for every component
    pub leader_election: LeaderElection,
}

/// Container image override
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImageValues {
    /// Image tag
    pub tag: String,
}

/// A chart feature switch
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Toggle {
    /// Whether the feature is on
    pub enabled: bool,
}

/// Rolling update bounds
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    /// Pods created above the desired count
    pub max_surge: u32,
    /// Pods allowed to be unavailable
    pub max_unavailable: u32,
}

/// Deployment strategy
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStrategy {
    /// Strategy type
    #[serde(rename = "type")]
    pub type_: String,
    /// Rolling update bounds
    pub rolling_update: RollingUpdate,
}

impl DeploymentStrategy {
    fn rolling(max_surge: u32, max_unavailable: u32) -> Self {
        Self {
            type_: "RollingUpdate".to_string(),
            rolling_update: RollingUpdate {
                max_surge,
                max_unavailable,
            },
        }
    }
}

/// Component log settings
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoggingValues {
    /// Output format
    pub format: String,
    /// klog verbosity
    pub verbosity: u8,
}

/// A component configuration file rendered by the chart
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    /// Configuration API version
    pub api_version: String,
    /// Configuration kind
    pub kind: String,
    /// Log settings
    pub logging: LoggingValues,
    /// Leader election, for components that elect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_election_config: Option<LeaderElection>,
    /// Gateway API support, controller only
    #[serde(rename = "enableGatewayAPI", skip_serializing_if = "Option::is_none")]
    pub enable_gateway_api: Option<bool>,
}

impl ComponentConfig {
    fn new(group: &str, kind: &str, leader_namespace: Option<&str>) -> Self {
        Self {
            api_version: format!("{}.config.cert-manager.io/v1alpha1", group),
            kind: kind.to_string(),
            logging: LoggingValues {
                format: "json".to_string(),
                verbosity: 5,
            },
            leader_election_config: leader_namespace.map(|ns| LeaderElection {
                namespace: ns.to_string(),
            }),
            enable_gateway_api: None,
        }
    }
}

/// CRD installation
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CrdValues {
    /// Install CRDs with the chart
    pub enabled: bool,
    /// Keep CRDs on uninstall
    pub keep: bool,
}

/// Values of the cainjector and webhook subcharts
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentValues {
    /// Replicas
    pub replica_count: u32,
    /// Component configuration
    pub config: ComponentConfig,
    /// Deployment strategy
    pub strategy: DeploymentStrategy,
    /// PodDisruptionBudget
    pub pod_disruption_budget: Toggle,
}

/// Typed values of the cert-manager chart
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertManagerValues {
    /// Chart-wide settings
    pub global: GlobalValues,
    /// Controller image
    pub image: ImageValues,
    /// Controller replicas
    pub replica_count: u32,
    /// Controller PodDisruptionBudget
    pub pod_disruption_budget: Toggle,
    /// Controller strategy
    pub strategy: DeploymentStrategy,
    /// Controller configuration
    pub config: ComponentConfig,
    /// CRD installation
    pub crds: CrdValues,
    /// ServiceMonitor and metrics
    pub prometheus: Toggle,
    /// CA injector
    pub cainjector: ComponentValues,
    /// Admission webhook
    pub webhook: ComponentValues,
}

impl CertManagerValues {
    /// Build values for `config`; gateway API support is advertised only
    /// outside local clusters
    pub fn new(config: &CertManagerConfig, local: bool) -> Result<Self> {
        let ns = config.namespace.as_str();
        let replicas = config.replicas;

        let mut controller = ComponentConfig::new("controller", "ControllerConfiguration", Some(ns));
        controller.enable_gateway_api = Some(!local);

        let values = Self {
            global: GlobalValues {
                leader_election: LeaderElection {
                    namespace: ns.to_string(),
                },
            },
            image: ImageValues {
                tag: image_tag(&config.version),
            },
            replica_count: replicas,
            pod_disruption_budget: Toggle { enabled: true },
            strategy: DeploymentStrategy::rolling(1, 1),
            config: controller,
            crds: CrdValues {
                enabled: true,
                keep: false,
            },
            prometheus: Toggle { enabled: true },
            cainjector: ComponentValues {
                replica_count: replicas,
                config: ComponentConfig::new("cainjector", "CAInjectorConfiguration", Some(ns)),
                strategy: DeploymentStrategy::rolling(0, 1),
                pod_disruption_budget: Toggle { enabled: true },
            },
            webhook: ComponentValues {
                replica_count: replicas,
                config: ComponentConfig::new("webhook", "WebhookConfiguration", None),
                strategy: DeploymentStrategy::rolling(0, 1),
                pod_disruption_budget: Toggle { enabled: true },
            },
        };
        values.validate()?;
        Ok(values)
    }

    /// Reject values the chart would accept but that break the stack
    pub fn validate(&self) -> Result<()> {
        if self.global.leader_election.namespace.trim().is_empty() {
            return Err(Error::validation_for_field(
                RELEASE_NAME,
                "global.leaderElection.namespace",
                "must not be empty",
            ));
        }
        for (field, count) in [
            ("replicaCount", self.replica_count),
            ("cainjector.replicaCount", self.cainjector.replica_count),
            ("webhook.replicaCount", self.webhook.replica_count),
        ] {
            if count == 0 {
                return Err(Error::validation_for_field(
                    RELEASE_NAME,
                    field,
                    "must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

fn image_tag(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{}", version)
    }
}

/// Ids of the cert-manager resources
#[derive(Clone, Debug, PartialEq)]
pub struct CertManagerIds {
    /// The cert-manager namespace
    pub namespace: ResourceId,
    /// The chart installation
    pub chart: ResourceId,
}

/// Plans the cert-manager namespace and chart
#[derive(Clone, Debug)]
pub struct CertManagerDeployer {
    namespace: String,
    chart: ChartSpec,
}

impl CertManagerDeployer {
    /// Build and validate the chart values for `config`
    pub fn new(config: &CertManagerConfig, local: bool) -> Result<Self> {
        let values = CertManagerValues::new(config, local)?;
        Ok(Self {
            namespace: config.namespace.clone(),
            chart: ChartSpec {
                chart: config.chart.clone(),
                repo: Some(config.repo.clone()),
                version: config.version.clone(),
                values: to_value(&values, "cert-manager values")?,
            },
        })
    }

    /// Insert the namespace and chart, then register the exports
    pub fn plan(&self, graph: &mut ResourceGraph) -> Result<CertManagerIds> {
        let namespace = insert_namespace(graph, &self.namespace, APP)?;
        let chart = graph.insert(
            ResourceNode::chart(RELEASE_NAME, &self.namespace, self.chart.clone()).after([&namespace]),
        )?;

        graph.export(
            "certManagerNamespace",
            ExportSource::NamespaceOf(namespace.clone()),
            false,
        )?;
        graph.export("certManagerStatus", ExportSource::StatusOf(chart.clone()), false)?;

        debug!(namespace = %self.namespace, "planned cert-manager");
        Ok(CertManagerIds { namespace, chart })
    }
}

/// Annotation ordering the issuer after the webhook in manifest tooling
pub fn webhook_dependency(namespace: &str) -> String {
    format!("/namespaces/{}/Deployment/{}-webhook", namespace, RELEASE_NAME)
}
