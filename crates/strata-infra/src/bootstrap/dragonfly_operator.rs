//! Dragonfly operator planning
//!
//! Installs the operator chart (with its CRDs) and declares one `Dragonfly`
//! custom resource in a separate namespace. The resource is issued after the
//! operator chart since the chart registers its kind.

use std::collections::BTreeMap;

use serde::Serialize;
use strata_common::config::DragonflyOperatorConfig;
use strata_common::graph::ResourceGraph;
use strata_common::resource::{ChartSpec, CustomResourceSpec, ExportSource, ResourceId, ResourceNode};
use strata_common::{Error, Result, APP_LABEL_KEY};
use tracing::debug;

use super::{insert_namespace, to_value, Quantities, ResourceRequirements};

/// API version of the `Dragonfly` kind
pub const DRAGONFLY_API_VERSION: &str = "dragonflydb.io/v1alpha1";

/// Release name of the operator chart
pub const RELEASE_NAME: &str = "dragonfly-operator";

/// CRD handling in the operator chart
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct OperatorCrds {
    /// Install the CRDs
    pub install: bool,
    /// Keep them on uninstall
    pub keep: bool,
}

/// Controller manager container
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ManagerValues {
    /// Container resources
    pub resources: ResourceRequirements,
}

/// Typed values of the operator chart
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorValues {
    /// Operator replicas
    pub replica_count: u32,
    /// CRD handling
    pub crds: OperatorCrds,
    /// Manager container
    pub manager: ManagerValues,
}

impl OperatorValues {
    /// Values for `config`
    pub fn new(config: &DragonflyOperatorConfig) -> Result<Self> {
        if config.replicas == 0 {
            return Err(Error::validation_for_field(
                RELEASE_NAME,
                "replicaCount",
                "must be at least 1",
            ));
        }
        Ok(Self {
            replica_count: config.replicas,
            crds: OperatorCrds {
                install: true,
                keep: false,
            },
            manager: ManagerValues {
                resources: ResourceRequirements::new(
                    Quantities::new("500m", "128Mi"),
                    Quantities::new("10m", "64Mi"),
                ),
            },
        })
    }
}

/// Spec of a `Dragonfly` custom resource
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DragonflySpec {
    /// Pods: one primary, the rest replicas
    pub replicas: u32,
    /// Server image
    pub image: String,
    /// Container resources
    pub resources: ResourceRequirements,
    /// Server flags
    pub args: Vec<String>,
}

impl DragonflySpec {
    /// Spec for `config`
    pub fn new(config: &DragonflyOperatorConfig) -> Result<Self> {
        if config.cluster_replicas == 0 {
            return Err(Error::validation_for_field(
                &config.cluster_name,
                "replicas",
                "must be at least 1",
            ));
        }
        if config.cluster_image.trim().is_empty() {
            return Err(Error::validation_for_field(
                &config.cluster_name,
                "image",
                "must not be empty",
            ));
        }
        Ok(Self {
            replicas: config.cluster_replicas,
            image: config.cluster_image.clone(),
            resources: ResourceRequirements::new(
                Quantities::new("600m", "750Mi"),
                Quantities::new("500m", "500Mi"),
            ),
            args: [
                "--bind=127.0.0.1",
                "--dir=/data",
                "--dbfilename=dragonfly-dump",
                "--snapshot_cron=0 * * * *",
            ]
            .iter()
            .map(|a| a.to_string())
            .collect(),
        })
    }
}

/// Ids of the operator resources
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorIds {
    /// Operator namespace
    pub namespace: ResourceId,
    /// Operator chart
    pub chart: ResourceId,
    /// Namespace of the managed cluster
    pub cluster_namespace: ResourceId,
    /// The `Dragonfly` resource
    pub cluster: ResourceId,
}

/// Plans the operator and its managed cluster
pub struct DragonflyOperatorDeployer {
    namespace: String,
    cluster_namespace: String,
    cluster_name: String,
    chart: ChartSpec,
    cluster: DragonflySpec,
}

impl DragonflyOperatorDeployer {
    /// Build the chart values and the cluster spec
    pub fn new(config: &DragonflyOperatorConfig) -> Result<Self> {
        let values = OperatorValues::new(config)?;
        Ok(Self {
            namespace: config.namespace.clone(),
            cluster_namespace: config.cluster_namespace.clone(),
            cluster_name: config.cluster_name.clone(),
            chart: ChartSpec {
                chart: config.chart.clone(),
                repo: None,
                version: config.version.clone(),
                values: to_value(&values, "dragonfly-operator values")?,
            },
            cluster: DragonflySpec::new(config)?,
        })
    }

    /// Insert the operator and cluster resources, then register the export
    pub fn plan(&self, graph: &mut ResourceGraph) -> Result<OperatorIds> {
        let namespace = insert_namespace(graph, &self.namespace, RELEASE_NAME)?;
        let chart = graph.insert(
            ResourceNode::chart(RELEASE_NAME, &self.namespace, self.chart.clone())
                .after([&namespace]),
        )?;

        let cluster_namespace = insert_namespace(graph, &self.cluster_namespace, "dragonfly")?;
        let cluster = graph.insert(
            ResourceNode::custom(
                DRAGONFLY_API_VERSION,
                "Dragonfly",
                &self.cluster_name,
                Some(self.cluster_namespace.as_str()),
                CustomResourceSpec {
                    labels: self.cluster_labels(),
                    annotations: BTreeMap::new(),
                    spec: to_value(&self.cluster, "Dragonfly")?,
                },
            )
            .after([&chart, &cluster_namespace]),
        )?;

        graph.export(
            "dragonflyOperatorNamespace",
            ExportSource::NamespaceOf(namespace.clone()),
            false,
        )?;

        debug!(
            namespace = %self.namespace,
            cluster = %self.cluster_name,
            replicas = self.cluster.replicas,
            "planned dragonfly operator"
        );
        Ok(OperatorIds {
            namespace,
            chart,
            cluster_namespace,
            cluster,
        })
    }

    fn cluster_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_LABEL_KEY.to_string(), "dragonfly".to_string()),
            (
                "app.kubernetes.io/instance".to_string(),
                "dragonfly-instance".to_string(),
            ),
            ("app.kubernetes.io/name".to_string(), self.cluster_name.clone()),
            ("app.kubernetes.io/part-of".to_string(), RELEASE_NAME.to_string()),
        ])
    }
}
