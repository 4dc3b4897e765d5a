//! Workload planning
//!
//! Each submodule turns one section of the stack configuration into typed chart
//! values and resource nodes, inserting them into a [`ResourceGraph`] with the
//! predecessors they need:
//!
//! - [`cert_manager`]: cert-manager namespace and chart
//! - [`issuer`]: CA secret and the ClusterIssuer backed by it
//! - [`valkey`]: replicated Valkey with sentinel
//! - [`dragonfly`]: Dragonfly from its standalone chart
//! - [`dragonfly_operator`]: Dragonfly operator and an operator-managed cluster
//!
//! Values are plain serde structs serialized camelCase, validated when they
//! are built so a broken configuration never reaches the engine.

pub mod cert_manager;
pub mod dragonfly;
pub mod dragonfly_operator;
pub mod issuer;
pub mod valkey;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use strata_common::graph::ResourceGraph;
use strata_common::resource::{CustomResourceSpec, ResourceId, ResourceNode};
use strata_common::{Error, Result, APP_LABEL_KEY};

/// cert-manager API version for Certificate and ClusterIssuer
pub const CERT_MANAGER_API_VERSION: &str = "cert-manager.io/v1";

/// Lifetime of workload certificates (10 years)
pub const WORKLOAD_CERT_DURATION: &str = "87600h0m0s";

/// Labels carried by every namespace and object of a workload
pub fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL_KEY.to_string(), app.to_string())])
}

/// Serialize typed values into a chart or custom resource payload
pub(crate) fn to_value<T: Serialize>(values: &T, kind: &str) -> Result<Value> {
    serde_json::to_value(values).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// Ids of the resources one workload planned
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadIds {
    /// The workload namespace
    pub namespace: ResourceId,
    /// The workload's TLS certificate, when it has one
    pub certificate: Option<ResourceId>,
    /// The ACL policy secret, when it has one
    pub acl_secret: Option<ResourceId>,
    /// The chart installation
    pub chart: ResourceId,
}

/// CPU and memory quantities
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Quantities {
    /// CPU quantity, e.g. `500m`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity, e.g. `750Mi`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl Quantities {
    /// Both CPU and memory
    pub fn new(cpu: &str, memory: &str) -> Self {
        Self {
            cpu: Some(cpu.to_string()),
            memory: Some(memory.to_string()),
        }
    }

    /// Memory only
    pub fn memory(memory: &str) -> Self {
        Self {
            cpu: None,
            memory: Some(memory.to_string()),
        }
    }
}

/// Container resource requirements
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResourceRequirements {
    /// Upper bounds
    pub limits: Quantities,
    /// Scheduling requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<Quantities>,
}

impl ResourceRequirements {
    /// Limits and requests
    pub fn new(limits: Quantities, requests: Quantities) -> Self {
        Self {
            limits,
            requests: Some(requests),
        }
    }
}

/// Linux capabilities adjustment
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Capabilities {
    /// Capabilities to drop
    pub drop: Vec<String>,
}

/// Hardened container security context
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSecurityContext {
    /// Capabilities
    pub capabilities: Capabilities,
    /// Mount the root filesystem read-only
    pub read_only_root_filesystem: bool,
    /// Refuse to start as root
    pub run_as_non_root: bool,
    /// Fixed uid
    pub run_as_user: u32,
    /// Forbid setuid escalation
    pub allow_privilege_escalation: bool,
}

impl ContainerSecurityContext {
    /// Drop every capability, read-only root, non-root `uid`
    pub fn restricted(uid: u32) -> Self {
        Self {
            capabilities: Capabilities {
                drop: vec!["ALL".to_string()],
            },
            read_only_root_filesystem: true,
            run_as_non_root: true,
            run_as_user: uid,
            allow_privilege_escalation: false,
        }
    }
}

/// Reference to the issuer of a cert-manager Certificate
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IssuerRef {
    /// Issuer kind
    pub kind: String,
    /// Issuer name
    pub name: String,
    /// API group
    pub group: String,
}

impl IssuerRef {
    /// Reference a ClusterIssuer
    pub fn cluster_issuer(name: &str) -> Self {
        Self {
            kind: "ClusterIssuer".to_string(),
            name: name.to_string(),
            group: "cert-manager.io".to_string(),
        }
    }
}

/// Spec of a cert-manager `Certificate`
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Subject common name
    pub common_name: String,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// Requested lifetime
    pub duration: String,
    /// IP subject alternative names
    pub ip_addresses: Vec<String>,
    /// Signing issuer
    pub issuer_ref: IssuerRef,
    /// Secret the signed pair is written to
    pub secret_name: String,
    /// Key usages
    pub usages: Vec<String>,
}

impl CertificateSpec {
    /// Certificate for in-cluster services of one namespace
    ///
    /// Covers every DNS form of each service (wildcard, FQDN, short names),
    /// plus `localhost` and `127.0.0.1` for in-pod probes.
    pub fn for_services(
        common_name: &str,
        namespace: &str,
        services: &[&str],
        issuer: &str,
        secret_name: &str,
    ) -> Result<Self> {
        if services.is_empty() {
            return Err(Error::validation_for_field(
                common_name,
                "dnsNames",
                "at least one service is required",
            ));
        }
        if secret_name.trim().is_empty() {
            return Err(Error::validation_for_field(
                common_name,
                "secretName",
                "must not be empty",
            ));
        }

        let mut dns_names = Vec::with_capacity(services.len() * 5 + 1);
        for svc in services {
            dns_names.push(format!("*.{}.{}.svc.cluster.local", svc, namespace));
            dns_names.push(format!("{}.{}.svc.cluster.local", svc, namespace));
            dns_names.push(format!("{}.{}.svc", svc, namespace));
            dns_names.push(format!("{}.{}", svc, namespace));
            dns_names.push(svc.to_string());
        }
        dns_names.push("localhost".to_string());

        Ok(Self {
            common_name: common_name.to_string(),
            dns_names,
            duration: WORKLOAD_CERT_DURATION.to_string(),
            ip_addresses: vec!["127.0.0.1".to_string()],
            issuer_ref: IssuerRef::cluster_issuer(issuer),
            secret_name: secret_name.to_string(),
            usages: ["client auth", "server auth", "signing", "key encipherment"]
                .iter()
                .map(|u| u.to_string())
                .collect(),
        })
    }

    /// Resource node for this certificate
    pub fn into_node(
        self,
        name: &str,
        namespace: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<ResourceNode> {
        Ok(ResourceNode::custom(
            CERT_MANAGER_API_VERSION,
            "Certificate",
            name,
            Some(namespace),
            CustomResourceSpec {
                labels,
                annotations: BTreeMap::new(),
                spec: to_value(&self, "Certificate")?,
            },
        ))
    }
}

/// Insert a namespace node labelled for `app`
pub(crate) fn insert_namespace(graph: &mut ResourceGraph, name: &str, app: &str) -> Result<ResourceId> {
    graph.insert(ResourceNode::namespace(name, app_labels(app)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_dns_names() {
        let spec = CertificateSpec::for_services(
            "valkey",
            "valkey",
            &["valkey", "valkey-headless"],
            "internal-cluster-issuer",
            "valkey-tls-secret",
        )
        .unwrap();

        assert_eq!(spec.dns_names.len(), 11);
        assert_eq!(spec.dns_names[0], "*.valkey.valkey.svc.cluster.local");
        assert_eq!(spec.dns_names[5], "*.valkey-headless.valkey.svc.cluster.local");
        assert_eq!(spec.dns_names.last().map(String::as_str), Some("localhost"));
        assert!(spec.dns_names.iter().all(|n| !n.contains('\'')));
        assert_eq!(spec.ip_addresses, vec!["127.0.0.1"]);
        assert_eq!(spec.duration, "87600h0m0s");
    }

    #[test]
    fn test_certificate_validation() {
        assert!(CertificateSpec::for_services("x", "x", &[], "issuer", "s").is_err());
        assert!(CertificateSpec::for_services("x", "x", &["x"], "issuer", " ").is_err());
    }

    #[test]
    fn test_certificate_node_serializes_camel_case() {
        let node = CertificateSpec::for_services("df", "df", &["df"], "issuer", "df-tls")
            .unwrap()
            .into_node("df-certificate", "df", app_labels("df"))
            .unwrap();
        let manifest = node.manifest().unwrap();
        assert_eq!(manifest["kind"], "Certificate");
        assert_eq!(manifest["metadata"]["namespace"], "df");
        assert_eq!(manifest["spec"]["secretName"], "df-tls");
        assert_eq!(manifest["spec"]["issuerRef"]["kind"], "ClusterIssuer");
        assert_eq!(manifest["spec"]["usages"][3], "key encipherment");
    }

    #[test]
    fn test_restricted_security_context() {
        let value = serde_json::to_value(ContainerSecurityContext::restricted(1000)).unwrap();
        assert_eq!(value["capabilities"]["drop"][0], "ALL");
        assert_eq!(value["readOnlyRootFilesystem"], true);
        assert_eq!(value["runAsNonRoot"], true);
        assert_eq!(value["runAsUser"], 1000);
    }

    #[test]
    fn test_quantities_skip_missing() {
        let value = serde_json::to_value(ResourceRequirements {
            limits: Quantities::memory("2Gi"),
            requests: None,
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({ "limits": { "memory": "2Gi" } }));
    }
}
