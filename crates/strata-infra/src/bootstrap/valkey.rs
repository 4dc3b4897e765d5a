//! Valkey planning
//!
//! Replicated Valkey with sentinel, served over TLS with a certificate signed
//! by the internal issuer. The ACL file declares the sentinel and replica
//! users next to the application users and is passed to the chart as common
//! configuration.

use serde::Serialize;
use strata_common::config::ValkeyConfig;
use strata_common::graph::ResourceGraph;
use strata_common::policy::{AclGrammar, PolicyCompiler, RenderedPolicy, ReplicationUsers};
use strata_common::resource::{ChartSpec, ExportSource, ResourceNode, SecretSpec, SecretType};
use strata_common::{Error, Result};
use tracing::debug;

use super::issuer::IssuerIds;
use super::{
    app_labels, insert_namespace, to_value, CertificateSpec, ContainerSecurityContext, Quantities,
    ResourceRequirements, WorkloadIds,
};
use crate::pki::{TLS_CRT, TLS_KEY};

const APP: &str = "valkey";

/// TLS secret written by the Valkey certificate
pub const TLS_SECRET_NAME: &str = "valkey-tls-secret";

/// Secret holding the rendered ACL file
pub const ACL_SECRET_NAME: &str = "valkey-acl";

/// Uid of the bitnami Valkey image
const VALKEY_UID: u32 = 1001;

/// Chart authentication
#[derive(Clone, PartialEq, Serialize)]
pub struct AuthValues {
    /// Require a password
    pub enabled: bool,
    /// Default user password
    pub password: String,
}

impl std::fmt::Debug for AuthValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthValues")
            .field("enabled", &self.enabled)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Sentinel sidecars
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SentinelValues {
    /// Run sentinel
    pub enabled: bool,
    /// Sentinel container resources
    pub resources: ResourceRequirements,
}

/// TLS from an existing secret
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValkeyTlsValues {
    /// Serve TLS
    pub enabled: bool,
    /// Secret with the key pair and CA
    pub existing_secret: String,
    /// Certificate key in the secret
    pub cert_filename: String,
    /// Private key key in the secret
    pub cert_key_filename: String,
    /// CA key in the secret
    #[serde(rename = "certCAFilename")]
    pub cert_ca_filename: String,
}

/// Security context toggle in the bitnami layout
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BitnamiSecurityContext {
    /// Apply the context
    pub enabled: bool,
    /// The context itself
    #[serde(flatten)]
    pub context: ContainerSecurityContext,
}

/// Primary or replica pod settings
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeValues {
    /// Container security context
    pub container_security_context: BitnamiSecurityContext,
}

/// Typed values of the Valkey chart
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValkeyValues {
    /// Topology
    pub architecture: String,
    /// Authentication
    pub auth: AuthValues,
    /// ACL file contents
    pub common_configuration: String,
    /// Sentinel
    pub sentinel: SentinelValues,
    /// TLS
    pub tls: ValkeyTlsValues,
    /// Primary pod
    pub primary: NodeValues,
    /// Replica pods
    pub replica: NodeValues,
}

impl ValkeyValues {
    /// Values for `config` with `policy` as the server's ACL configuration
    pub fn new(config: &ValkeyConfig, policy: &RenderedPolicy) -> Result<Self> {
        let hardened = NodeValues {
            container_security_context: BitnamiSecurityContext {
                enabled: true,
                context: ContainerSecurityContext::restricted(VALKEY_UID),
            },
        };

        let values = Self {
            architecture: "replication".to_string(),
            auth: AuthValues {
                enabled: true,
                password: config.auth_password.clone(),
            },
            common_configuration: policy.text().to_string(),
            sentinel: SentinelValues {
                enabled: true,
                resources: ResourceRequirements::new(
                    Quantities::new("600m", "750Mi"),
                    Quantities::new("500m", "500Mi"),
                ),
            },
            tls: ValkeyTlsValues {
                enabled: true,
                existing_secret: TLS_SECRET_NAME.to_string(),
                cert_filename: TLS_CRT.to_string(),
                cert_key_filename: TLS_KEY.to_string(),
                cert_ca_filename: "ca.crt".to_string(),
            },
            primary: hardened.clone(),
            replica: hardened,
        };
        values.validate()?;
        Ok(values)
    }

    /// Reject values that would start an unauthenticated or unencrypted server
    pub fn validate(&self) -> Result<()> {
        if self.auth.password.trim().is_empty() {
            return Err(Error::validation_for_field(APP, "auth.password", "must not be empty"));
        }
        if self.common_configuration.trim().is_empty() {
            return Err(Error::validation_for_field(
                APP,
                "commonConfiguration",
                "ACL content must not be empty",
            ));
        }
        if self.tls.existing_secret.trim().is_empty() {
            return Err(Error::validation_for_field(
                APP,
                "tls.existingSecret",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

/// Compile the Valkey ACL file for `config`
pub fn compile_policy(config: &ValkeyConfig) -> Result<RenderedPolicy> {
    let users = ReplicationUsers::new(&config.sentinel_password, &config.replica_password)?;
    PolicyCompiler::new(AclGrammar::Replicated(users)).compile(&config.credentials)
}

/// Plans namespace, certificate, ACL secret and chart for Valkey
pub struct ValkeyDeployer {
    namespace: String,
    policy: RenderedPolicy,
    chart: ChartSpec,
}

impl ValkeyDeployer {
    /// Compile the ACL file and build the chart values
    pub fn new(config: &ValkeyConfig) -> Result<Self> {
        let policy = compile_policy(config)?;
        let values = ValkeyValues::new(config, &policy)?;
        Ok(Self {
            namespace: config.namespace.clone(),
            chart: ChartSpec {
                chart: config.chart.clone(),
                repo: None,
                version: config.version.clone(),
                values: to_value(&values, "valkey values")?,
            },
            policy,
        })
    }

    /// The compiled ACL file
    pub fn policy(&self) -> &RenderedPolicy {
        &self.policy
    }

    /// Insert the Valkey resources, then register the exports
    pub fn plan(&self, graph: &mut ResourceGraph, issuer: &IssuerIds) -> Result<WorkloadIds> {
        let ns = self.namespace.as_str();
        let release = ns;
        let headless = format!("{}-headless", release);

        let namespace = insert_namespace(graph, ns, APP)?;

        let mut cert_labels = app_labels(APP);
        cert_labels.insert("app.kubernetes.io/managed-by".to_string(), "Helm".to_string());
        cert_labels.insert("version".to_string(), self.chart.version.clone());
        cert_labels.insert(
            "helm.sh/chart".to_string(),
            format!("{}-{}", APP, self.chart.version),
        );
        let certificate = graph.insert(
            CertificateSpec::for_services(
                APP,
                ns,
                &[release, headless.as_str()],
                issuer.issuer_name(),
                TLS_SECRET_NAME,
            )?
            .into_node("valkey-certificate", ns, cert_labels)?
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
            ResourceNode::chart(release, ns, self.chart.clone()).after([
                &namespace,
                &certificate,
                &acl_secret,
            ]),
        )?;

        graph.export("valkeyNamespace", ExportSource::NamespaceOf(namespace.clone()), false)?;
        graph.export("valkeyStatus", ExportSource::StatusOf(chart.clone()), false)?;

        debug!(
            namespace = ns,
            users = self.policy.credential_count(),
            "planned valkey"
        );
        Ok(WorkloadIds {
            namespace,
            certificate: Some(certificate),
            acl_secret: Some(acl_secret),
            chart,
        })
    }
}
