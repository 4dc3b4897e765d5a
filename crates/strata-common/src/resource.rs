//! Resource model for a deployment run
//!
//! A [`ResourceNode`] is one declarative unit of cluster state: an identity, a
//! strongly typed payload and the predecessors it must wait on. Nodes are
//! immutable once built; the graph owns them for the duration of one run.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Kind of resource a node describes
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// `v1/Namespace`
    Namespace,
    /// `v1/Secret`
    Secret,
    /// A custom resource (cert-manager, dragonfly operator, ...)
    Custom {
        /// Full apiVersion, e.g. `cert-manager.io/v1`
        api_version: String,
        /// Kind, e.g. `ClusterIssuer`
        kind: String,
    },
    /// A Helm chart installation
    Chart,
}

impl ResourceKind {
    /// Short kind name used in identities and logs
    pub fn name(&self) -> &str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Secret => "Secret",
            ResourceKind::Custom { kind, .. } => kind,
            ResourceKind::Chart => "Chart",
        }
    }
}

/// Identity of a resource within one deployment run
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// What kind of resource this is
    pub kind: ResourceKind,
    /// Logical name (also the Kubernetes object / Helm release name)
    pub name: String,
    /// Target namespace, `None` for cluster-scoped resources
    pub namespace: Option<String>,
}

impl ResourceId {
    /// Create a resource identity
    pub fn new(kind: ResourceKind, name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.map(str::to_string),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind.name(), ns, self.name),
            None => write!(f, "{}/{}", self.kind.name(), self.name),
        }
    }
}

/// Payload of a namespace node
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamespaceSpec {
    /// Labels applied to the namespace
    pub labels: BTreeMap<String, String>,
}

/// Kubernetes secret type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretType {
    /// `Opaque`
    Opaque,
    /// `kubernetes.io/tls`
    Tls,
}

impl SecretType {
    /// The Kubernetes `type` field value
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretType::Opaque => "Opaque",
            SecretType::Tls => "kubernetes.io/tls",
        }
    }
}

/// Payload of a secret node
#[derive(Clone, PartialEq)]
pub struct SecretSpec {
    /// Secret type
    pub type_: SecretType,
    /// Labels applied to the secret
    pub labels: BTreeMap<String, String>,
    /// String data (keys to plaintext values)
    pub string_data: BTreeMap<String, String>,
}

impl fmt::Debug for SecretSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretSpec")
            .field("type_", &self.type_)
            .field("labels", &self.labels)
            .field("keys", &self.string_data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Payload of a custom resource node
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomResourceSpec {
    /// Labels applied to the object
    pub labels: BTreeMap<String, String>,
    /// Annotations applied to the object
    pub annotations: BTreeMap<String, String>,
    /// The `spec` field, already serialized from a typed struct
    pub spec: Value,
}

/// Payload of a chart installation node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Chart reference: a chart name (with `repo`) or an `oci://` URL
    pub chart: String,
    /// Classic Helm repository URL, if the chart is not an OCI reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Chart version
    pub version: String,
    /// Chart values, serialized from a typed values struct
    pub values: Value,
}

/// Strongly typed payload of a resource node
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceSpec {
    /// A namespace manifest
    Namespace(NamespaceSpec),
    /// A secret manifest
    Secret(SecretSpec),
    /// A custom resource manifest
    Custom(CustomResourceSpec),
    /// A chart installation
    Chart(ChartSpec),
}

/// A single declarative unit of infrastructure state with explicit predecessors
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceNode {
    id: ResourceId,
    spec: ResourceSpec,
    predecessors: Vec<ResourceId>,
}

impl ResourceNode {
    /// Create a namespace node
    pub fn namespace(name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self {
            id: ResourceId::new(ResourceKind::Namespace, name, None),
            spec: ResourceSpec::Namespace(NamespaceSpec { labels }),
            predecessors: Vec::new(),
        }
    }

    /// Create a secret node
    pub fn secret(name: impl Into<String>, namespace: &str, spec: SecretSpec) -> Self {
        Self {
            id: ResourceId::new(ResourceKind::Secret, name, Some(namespace)),
            spec: ResourceSpec::Secret(spec),
            predecessors: Vec::new(),
        }
    }

    /// Create a custom resource node (`namespace` is `None` when cluster-scoped)
    pub fn custom(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: Option<&str>,
        spec: CustomResourceSpec,
    ) -> Self {
        let kind = ResourceKind::Custom {
            api_version: api_version.into(),
            kind: kind.into(),
        };
        Self {
            id: ResourceId::new(kind, name, namespace),
            spec: ResourceSpec::Custom(spec),
            predecessors: Vec::new(),
        }
    }

    /// Create a chart installation node; `release` is the Helm release name
    pub fn chart(release: impl Into<String>, namespace: &str, spec: ChartSpec) -> Self {
        Self {
            id: ResourceId::new(ResourceKind::Chart, release, Some(namespace)),
            spec: ResourceSpec::Chart(spec),
            predecessors: Vec::new(),
        }
    }

    /// Declare the predecessors this node must wait on (order is preserved,
    /// duplicates are dropped)
    pub fn after<'a>(mut self, predecessors: impl IntoIterator<Item = &'a ResourceId>) -> Self {
        for id in predecessors {
            if !self.predecessors.contains(id) {
                self.predecessors.push(id.clone());
            }
        }
        self
    }

    /// Identity of this node
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Payload of this node
    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    /// Declared direct predecessors, in declaration order
    pub fn predecessors(&self) -> &[ResourceId] {
        &self.predecessors
    }

    /// Render this node as a Kubernetes manifest (or, for charts, a release
    /// description)
    pub fn manifest(&self) -> Result<Value> {
        let kind = self.id.kind.name();
        match &self.spec {
            ResourceSpec::Namespace(spec) => {
                let ns = Namespace {
                    metadata: ObjectMeta {
                        name: Some(self.id.name.clone()),
                        labels: non_empty(&spec.labels),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                to_json(&ns, kind)
            }
            ResourceSpec::Secret(spec) => {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(self.id.name.clone()),
                        namespace: self.id.namespace.clone(),
                        labels: non_empty(&spec.labels),
                        ..Default::default()
                    },
                    type_: Some(spec.type_.as_str().to_string()),
                    string_data: Some(spec.string_data.clone()),
                    ..Default::default()
                };
                to_json(&secret, kind)
            }
            ResourceSpec::Custom(spec) => {
                let ResourceKind::Custom { api_version, kind } = &self.id.kind else {
                    return Err(Error::serialization_for_kind(
                        self.id.kind.name(),
                        "custom payload on a non-custom resource",
                    ));
                };
                let mut metadata = serde_json::Map::new();
                metadata.insert("name".into(), Value::String(self.id.name.clone()));
                if let Some(ns) = &self.id.namespace {
                    metadata.insert("namespace".into(), Value::String(ns.clone()));
                }
                if !spec.labels.is_empty() {
                    metadata.insert("labels".into(), serde_json::json!(spec.labels));
                }
                if !spec.annotations.is_empty() {
                    metadata.insert("annotations".into(), serde_json::json!(spec.annotations));
                }
                Ok(serde_json::json!({
                    "apiVersion": api_version,
                    "kind": kind,
                    "metadata": metadata,
                    "spec": spec.spec,
                }))
            }
            ResourceSpec::Chart(spec) => {
                let mut release = to_json(spec, kind)?;
                if let Value::Object(map) = &mut release {
                    map.insert("release".into(), Value::String(self.id.name.clone()));
                    map.insert(
                        "namespace".into(),
                        Value::String(self.id.namespace.clone().unwrap_or_default()),
                    );
                }
                Ok(release)
            }
        }
    }
}

fn non_empty(labels: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!labels.is_empty()).then(|| labels.clone())
}

fn to_json<T: Serialize>(value: &T, kind: &str) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// Engine-issued reference to an accepted resource
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceHandle {
    /// The resource this handle refers to
    pub id: ResourceId,
    /// Deployment run that issued the handle
    pub run_id: String,
    /// Server-assigned uid, when the engine has one
    pub uid: Option<String>,
    /// Status document reported by the engine
    pub status: Value,
}

/// Where an exported value comes from
#[derive(Clone, Debug, PartialEq)]
pub enum ExportSource {
    /// A fixed value known at planning time
    Literal(Value),
    /// The namespace a resource lives in (the name, for Namespace resources)
    NamespaceOf(ResourceId),
    /// The status the engine reported for a resource
    StatusOf(ResourceId),
    /// A fixed value, published only once `resource` deploys
    ValueOf {
        /// Resource the value belongs to
        resource: ResourceId,
        /// The value
        value: Value,
    },
}

impl ExportSource {
    /// The resource this export depends on, if any
    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            ExportSource::Literal(_) => None,
            ExportSource::NamespaceOf(id)
            | ExportSource::StatusOf(id)
            | ExportSource::ValueOf { resource: id, .. } => Some(id),
        }
    }
}

/// A named output value registered on the graph
#[derive(Clone, Debug, PartialEq)]
pub struct Export {
    /// Export key, e.g. `certManagerNamespace`
    pub key: String,
    /// Where the value comes from
    pub source: ExportSource,
    /// Whether the value must be redacted in output
    pub secret: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(app: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), app.to_string())])
    }

    #[test]
    fn test_resource_id_display() {
        let ns = ResourceId::new(ResourceKind::Namespace, "cache", None);
        assert_eq!(ns.to_string(), "Namespace/cache");

        let secret = ResourceId::new(ResourceKind::Secret, "valkey-acl", Some("valkey"));
        assert_eq!(secret.to_string(), "Secret/valkey/valkey-acl");

        let issuer = ResourceId::new(
            ResourceKind::Custom {
                api_version: "cert-manager.io/v1".into(),
                kind: "ClusterIssuer".into(),
            },
            "internal-cluster-issuer",
            None,
        );
        assert_eq!(issuer.to_string(), "ClusterIssuer/internal-cluster-issuer");
    }

    #[test]
    fn test_namespace_manifest() {
        let node = ResourceNode::namespace("cache", labels("valkey"));
        let manifest = node.manifest().expect("namespace should serialize");
        assert_eq!(manifest["apiVersion"], "v1");
        assert_eq!(manifest["kind"], "Namespace");
        assert_eq!(manifest["metadata"]["name"], "cache");
        assert_eq!(manifest["metadata"]["labels"]["app"], "valkey");
    }

    #[test]
    fn test_tls_secret_manifest() {
        let node = ResourceNode::secret(
            "cert-manager-ca-cert",
            "cert-manager",
            SecretSpec {
                type_: SecretType::Tls,
                labels: BTreeMap::new(),
                string_data: BTreeMap::from([
                    ("tls.key".to_string(), "KEY".to_string()),
                    ("tls.crt".to_string(), "CRT".to_string()),
                ]),
            },
        );
        let manifest = node.manifest().expect("secret should serialize");
        assert_eq!(manifest["kind"], "Secret");
        assert_eq!(manifest["type"], "kubernetes.io/tls");
        assert_eq!(manifest["metadata"]["namespace"], "cert-manager");
        assert_eq!(manifest["stringData"]["tls.key"], "KEY");
        assert!(manifest["metadata"].get("labels").is_none());
    }

    #[test]
    fn test_secret_debug_hides_values() {
        let spec = SecretSpec {
            type_: SecretType::Opaque,
            labels: BTreeMap::new(),
            string_data: BTreeMap::from([("valkey-acl".to_string(), "hunter2".to_string())]),
        };
        let debug = format!("{:?}", spec);
        assert!(debug.contains("valkey-acl"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_cluster_scoped_custom_manifest() {
        let node = ResourceNode::custom(
            "cert-manager.io/v1",
            "ClusterIssuer",
            "internal-cluster-issuer",
            None,
            CustomResourceSpec {
                spec: serde_json::json!({ "ca": { "secretName": "ca" } }),
                ..Default::default()
            },
        );
        let manifest = node.manifest().expect("custom resource should serialize");
        assert_eq!(manifest["apiVersion"], "cert-manager.io/v1");
        assert_eq!(manifest["kind"], "ClusterIssuer");
        assert!(manifest["metadata"].get("namespace").is_none());
        assert_eq!(manifest["spec"]["ca"]["secretName"], "ca");
    }

    #[test]
    fn test_chart_release_description() {
        let node = ResourceNode::chart(
            "valkey",
            "valkey",
            ChartSpec {
                chart: "oci://registry-1.docker.io/bitnamicharts/valkey".into(),
                repo: None,
                version: "3.0.16".into(),
                values: serde_json::json!({ "architecture": "replication" }),
            },
        );
        let manifest = node.manifest().expect("chart should serialize");
        assert_eq!(manifest["release"], "valkey");
        assert_eq!(manifest["namespace"], "valkey");
        assert_eq!(manifest["version"], "3.0.16");
        assert!(manifest.get("repo").is_none());
        assert_eq!(manifest["values"]["architecture"], "replication");
    }

    #[test]
    fn test_after_deduplicates_and_keeps_order() {
        let ns = ResourceId::new(ResourceKind::Namespace, "cache", None);
        let secret = ResourceId::new(ResourceKind::Secret, "acl", Some("cache"));
        let node = ResourceNode::namespace("other", BTreeMap::new())
            .after([&ns, &secret])
            .after([&ns]);
        assert_eq!(node.predecessors(), &[ns, secret]);
    }
}
