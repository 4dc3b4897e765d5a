//! Dragonfly planning
//!
//! Dragonfly from its standalone chart: persistent storage, emulated cluster
//! mode, TLS from a certificate signed by the internal issuer, and an ACL file
//! mounted from a secret. At least one application user is required since the
//! default user is locked down.

use k8s_openapi::api::core::v1::{PodSecurityContext, SecretVolumeSource, Volume, VolumeMount};
use serde::Serialize;
use strata_common::config::DragonflyConfig;
use strata_common::graph::ResourceGraph;
use strata_common::policy::{AclGrammar, PolicyCompiler, RenderedPolicy};
use strata_common::resource::{ChartSpec, ExportSource, ResourceNode, SecretSpec, SecretType};
use strata_common::{Error, Result};
use tracing::debug;

use super::issuer::IssuerIds;
use super::{
    app_labels, insert_namespace, to_value, CertificateSpec, ContainerSecurityContext, Quantities,
    ResourceRequirements, WorkloadIds,
};
use crate::pki::{TLS_CRT, TLS_KEY};

const APP: &str = "dragonfly";

/// TLS secret written by the Dragonfly certificate
pub const TLS_SECRET_NAME: &str = "dragonfly-tls-secret";

/// Secret holding the rendered ACL file
pub const ACL_SECRET_NAME: &str = "dragonfly-cluster-acls";

/// Directory the ACL secret is mounted at
pub const ACL_MOUNT_PATH: &str = "/etc/dragonfly";

const ACL_VOLUME: &str = "acl";
const DRAGONFLY_UID: u32 = 1000;
const DRAGONFLY_FS_GROUP: i64 = 2000;

/// Persistent volume settings
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StorageValues {
    /// Use a PVC
    pub enabled: bool,
    /// Requested size
    pub requests: String,
}

/// TLS from an existing secret
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DragonflyTlsValues {
    /// Serve TLS
    pub enabled: bool,
    /// Secret with the key pair
    pub existing_secret: String,
    /// Certificate key in the secret
    pub cert: String,
    /// Private key key in the secret
    pub key: String,
}

/// Typed values of the Dragonfly chart
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DragonflyValues {
    /// Pods
    pub replica_count: u32,
    /// Persistence
    pub storage: StorageValues,
    /// Server flags
    pub extra_args: Vec<String>,
    /// Pod security context
    pub pod_security_context: PodSecurityContext,
    /// Container security context
    pub security_context: ContainerSecurityContext,
    /// TLS
    pub tls: DragonflyTlsValues,
    /// Container resources
    pub resources: ResourceRequirements,
    /// Additional pod volumes
    pub extra_volumes: Vec<Volume>,
    /// Additional container mounts
    pub extra_volume_mounts: Vec<VolumeMount>,
}

impl DragonflyValues {
    /// Values for `config`; the ACL file is read from the mounted secret
    pub fn new(config: &DragonflyConfig) -> Result<Self> {
        let values = Self {
            replica_count: config.replicas,
            storage: StorageValues {
                enabled: true,
                requests: config.storage.clone(),
            },
            extra_args: server_args(),
            pod_security_context: PodSecurityContext {
                fs_group: Some(DRAGONFLY_FS_GROUP),
                ..Default::default()
            },
            security_context: ContainerSecurityContext::restricted(DRAGONFLY_UID),
            tls: DragonflyTlsValues {
                enabled: true,
                existing_secret: TLS_SECRET_NAME.to_string(),
                cert: TLS_CRT.to_string(),
                key: TLS_KEY.to_string(),
            },
            resources: ResourceRequirements {
                limits: Quantities::memory(&config.memory_limit),
                requests: None,
            },
            extra_volumes: vec![Volume {
                name: ACL_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(ACL_SECRET_NAME.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            extra_volume_mounts: vec![VolumeMount {
                name: ACL_VOLUME.to_string(),
                mount_path: ACL_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            }],
        };
        values.validate()?;
        Ok(values)
    }

    /// Reject values that cannot produce a working server
    pub fn validate(&self) -> Result<()> {
        if self.replica_count == 0 {
            return Err(Error::validation_for_field(APP, "replicaCount", "must be at least 1"));
        }
        if self.storage.enabled && self.storage.requests.trim().is_empty() {
            return Err(Error::validation_for_field(
                APP,
                "storage.requests",
                "must not be empty when storage is enabled",
            ));
        }
        if self.tls.existing_secret.trim().is_empty() {
            return Err(Error::validation_for_field(
                APP,
                "tls.existing_secret",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

fn server_args() -> Vec<String> {
    vec![
        "--cluster_mode=emulated".to_string(),
        "--admin_port=8000".to_string(),
        "--dbfilename=dragonfly-dump".to_string(),
        "--snapshot_cron=* * * * *".to_string(),
        format!("--aclfile={}/{}", ACL_MOUNT_PATH, ACL_SECRET_NAME),
    ]
}

/// Compile the Dragonfly ACL file for `config`
pub fn compile_policy(config: &DragonflyConfig) -> Result<RenderedPolicy> {
    PolicyCompiler::new(AclGrammar::AppendOnly)
        .require_credentials(true)
        .compile(&config.credentials)
}

/// Plans namespace, certificate, ACL secret and chart for Dragonfly
pub struct DragonflyDeployer {
    namespace: String,
    policy: RenderedPolicy,
    chart: ChartSpec,
}

impl DragonflyDeployer {
    /// Compile the ACL file and build the chart values
    pub fn new(config: &DragonflyConfig) -> Result<Self> {
        let policy = compile_policy(config)?;
        let values = DragonflyValues::new(config)?;
        Ok(Self {
            namespace: config.namespace.clone(),
            chart: ChartSpec {
                chart: config.chart.clone(),
                repo: None,
                version: config.version.clone(),
                values: to_value(&values, "dragonfly values")?,
            },
            policy,
        })
    }

    /// The compiled ACL file
    pub fn policy(&self) -> &RenderedPolicy {
        &self.policy
    }

    /// Insert the Dragonfly resources, then register the exports
    pub fn plan(&self, graph: &mut ResourceGraph, issuer: &IssuerIds) -> Result<WorkloadIds> {
        let ns = self.namespace.as_str();
        let namespace = insert_namespace(graph, ns, APP)?;

        let certificate = graph.insert(
            CertificateSpec::for_services(APP, ns, &[ns], issuer.issuer_name(), TLS_SECRET_NAME)?
                .into_node("dragonfly-certificate", ns, app_labels(APP))?
                .after([&namespace, &issuer.issuer]),
        )?;

        let acl_secret = graph.insert(
            ResourceNode::secret(
                ACL_SECRET_NAME,
                ns,
                SecretSpec {
                    type_: SecretType::Opaque,
                    labels: app_labels(APP),
                    string_data: [(ACL_SECRET_NAME.to_string(), self.policy.text().to_string())]
                        .into(),
                },
            )
            .after([&namespace]),
        )?;

        let chart = graph.insert(
            ResourceNode::chart(ns, ns, self.chart.clone()).after([
                &namespace,
                &certificate,
                &acl_secret,
            ]),
        )?;

        graph.export(
            "dragonflyNamespace",
            ExportSource::NamespaceOf(namespace.clone()),
            false,
        )?;
        graph.export("dragonflyStatus", ExportSource::StatusOf(chart.clone()), false)?;

        debug!(
            namespace = ns,
            users = self.policy.credential_count(),
            "planned dragonfly"
        );
        Ok(WorkloadIds {
            namespace,
            certificate: Some(certificate),
            acl_secret: Some(acl_secret),
            chart,
        })
    }
}
