//! Stack configuration
//!
//! Every name, chart coordinate and credential the deployers use comes from a
//! [`StackConfig`]. All sections have defaults, so an empty YAML document is a
//! complete local development stack.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::Credential;
use crate::{Error, Result, DEFAULT_FIELD_MANAGER};

/// Smallest RSA modulus accepted for the CA key
pub const MIN_RSA_BITS: usize = 2048;

/// Top-level stack configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StackConfig {
    /// Local (kind) cluster: self-signed CA, no Gateway API
    pub local: bool,
    /// Upper bound for a single resource apply, in seconds
    pub apply_timeout_secs: u64,
    /// Field manager for server-side apply
    pub field_manager: String,
    /// cert-manager and the internal CA
    pub cert_manager: CertManagerConfig,
    /// Valkey replicated cache
    pub valkey: ValkeyConfig,
    /// Dragonfly cache from the standalone chart
    pub dragonfly: DragonflyConfig,
    /// Dragonfly operator and its managed cluster
    pub dragonfly_operator: DragonflyOperatorConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            local: false,
            apply_timeout_secs: 120,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            cert_manager: CertManagerConfig::default(),
            valkey: ValkeyConfig::default(),
            dragonfly: DragonflyConfig::default(),
            dragonfly_operator: DragonflyOperatorConfig::default(),
        }
    }
}

/// cert-manager section
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CertManagerConfig {
    /// Namespace for cert-manager and the CA secret
    pub namespace: String,
    /// Chart name in the repository
    pub chart: String,
    /// Helm repository URL
    pub repo: String,
    /// Chart version (also the image tag, with a `v` prefix)
    pub version: String,
    /// Replicas for the controller, cainjector and webhook
    pub replicas: u32,
    /// Name of the ClusterIssuer backed by the CA
    pub issuer_name: String,
    /// Name of the TLS secret holding the CA pair
    pub ca_secret_name: String,
    /// Subject organization of the CA certificate
    pub organization: String,
    /// RSA modulus size for the CA key
    pub rsa_bits: usize,
}

impl Default for CertManagerConfig {
    fn default() -> Self {
        Self {
            namespace: "cert-manager".to_string(),
            chart: "cert-manager".to_string(),
            repo: "https://charts.jetstack.io".to_string(),
            version: "1.17.2".to_string(),
            replicas: 3,
            issuer_name: "internal-cluster-issuer".to_string(),
            ca_secret_name: "cert-manager-ca-cert".to_string(),
            organization: "Strata".to_string(),
            rsa_bits: MIN_RSA_BITS,
        }
    }
}

/// Valkey section
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValkeyConfig {
    /// Whether to deploy Valkey
    pub enabled: bool,
    /// Namespace (also the release and service name prefix)
    pub namespace: String,
    /// OCI chart reference
    pub chart: String,
    /// Chart version
    pub version: String,
    /// Password for the chart's built-in auth
    pub auth_password: String,
    /// Password of the sentinel user
    pub sentinel_password: String,
    /// Password of the replication user
    pub replica_password: String,
    /// Application users
    pub credentials: Vec<Credential>,
}

impl Default for ValkeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "valkey".to_string(),
            chart: "oci://registry-1.docker.io/bitnamicharts/valkey".to_string(),
            version: "3.0.16".to_string(),
            auth_password: "password".to_string(),
            sentinel_password: "sentinel-password".to_string(),
            replica_password: "replica-password".to_string(),
            credentials: default_credentials("test", "test", &["+AUTH", "+PING", "+GET", "+SET", "~*"]),
        }
    }
}

/// Development user shipped with the defaults
fn default_credentials(username: &str, password: &str, permissions: &[&str]) -> Vec<Credential> {
    let credential = Credential::new(username, password, permissions.iter().copied());
    debug_assert!(credential.is_ok(), "default credential {} is invalid", username);
    credential.into_iter().collect()
}

/// Dragonfly section
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DragonflyConfig {
    /// Whether to deploy Dragonfly
    pub enabled: bool,
    /// Namespace (also the release and service name prefix)
    pub namespace: String,
    /// OCI chart reference
    pub chart: String,
    /// Chart version
    pub version: String,
    /// Pod replicas
    pub replicas: u32,
    /// Persistent volume request
    pub storage: String,
    /// Container memory limit
    pub memory_limit: String,
    /// Application users (at least one is required)
    pub credentials: Vec<Credential>,
}

impl Default for DragonflyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "dragonfly".to_string(),
            chart: "oci://ghcr.io/dragonflydb/dragonfly/helm/dragonfly".to_string(),
            version: "v1.30.3".to_string(),
            replicas: 1,
            storage: "2Gi".to_string(),
            memory_limit: "2Gi".to_string(),
            credentials: default_credentials("test", "password", &["+@ALL"]),
        }
    }
}

/// Dragonfly operator section
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DragonflyOperatorConfig {
    /// Whether to deploy the operator and its cluster
    pub enabled: bool,
    /// Namespace for the operator
    pub namespace: String,
    /// OCI chart reference
    pub chart: String,
    /// Chart version
    pub version: String,
    /// Operator replicas
    pub replicas: u32,
    /// Namespace for the managed Dragonfly cluster
    pub cluster_namespace: String,
    /// Name of the Dragonfly custom resource
    pub cluster_name: String,
    /// Dragonfly pods in the managed cluster (one primary, the rest replicas)
    pub cluster_replicas: u32,
    /// Dragonfly image for the managed cluster
    pub cluster_image: String,
}

impl Default for DragonflyOperatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: "dragonfly-operator".to_string(),
            chart: "oci://ghcr.io/dragonflydb/dragonfly-operator/helm/dragonfly-operator"
                .to_string(),
            version: "v1.1.11".to_string(),
            replicas: 3,
            cluster_namespace: "dragonfly-cluster".to_string(),
            cluster_name: "dragonfly-cluster".to_string(),
            cluster_replicas: 3,
            cluster_image: "docker.dragonflydb.io/dragonflydb/dragonfly:v1.30.3".to_string(),
        }
    }
}

impl StackConfig {
    /// Load and validate a YAML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(&display, format!("failed to read: {}", e)))?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            Error::Config { message, .. } => Error::config(&display, message),
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: StackConfig = if content.trim().is_empty() {
            StackConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| Error::config("<inline>", format!("invalid YAML: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply timeout as a duration
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.apply_timeout_secs == 0 {
            return Err(invalid("applyTimeoutSecs", "must be greater than zero"));
        }
        if self.field_manager.trim().is_empty() {
            return Err(invalid("fieldManager", "must not be empty"));
        }

        let cm = &self.cert_manager;
        non_empty("certManager.namespace", &cm.namespace)?;
        non_empty("certManager.issuerName", &cm.issuer_name)?;
        non_empty("certManager.caSecretName", &cm.ca_secret_name)?;
        non_empty("certManager.organization", &cm.organization)?;
        at_least_one("certManager.replicas", cm.replicas)?;
        if cm.rsa_bits < MIN_RSA_BITS {
            return Err(invalid(
                "certManager.rsaBits",
                format!("must be at least {}", MIN_RSA_BITS),
            ));
        }

        if self.valkey.enabled {
            non_empty("valkey.namespace", &self.valkey.namespace)?;
            non_empty("valkey.authPassword", &self.valkey.auth_password)?;
        }

        if self.dragonfly.enabled {
            non_empty("dragonfly.namespace", &self.dragonfly.namespace)?;
            at_least_one("dragonfly.replicas", self.dragonfly.replicas)?;
            if self.dragonfly.credentials.is_empty() {
                return Err(invalid(
                    "dragonfly.credentials",
                    "at least one credential is required",
                ));
            }
        }

        if self.dragonfly_operator.enabled {
            let op = &self.dragonfly_operator;
            non_empty("dragonflyOperator.namespace", &op.namespace)?;
            non_empty("dragonflyOperator.clusterNamespace", &op.cluster_namespace)?;
            at_least_one("dragonflyOperator.replicas", op.replicas)?;
            at_least_one("dragonflyOperator.clusterReplicas", op.cluster_replicas)?;
        }

        Ok(())
    }
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::validation_for_field("stack config", field, msg)
}

fn non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(())
}

fn at_least_one(field: &str, value: u32) -> Result<()> {
    if value == 0 {
        return Err(invalid(field, "must be at least 1"));
    }
    Ok(())
}
