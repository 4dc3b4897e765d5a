//! Internal CA issuer
//!
//! Stores the bootstrapped CA pair as a TLS secret in the cert-manager
//! namespace and declares a cluster-scoped `ClusterIssuer` that signs workload
//! certificates with it. The issuer waits on both the secret and the
//! cert-manager chart, since its CRD and admission webhook come from the chart.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use strata_common::config::CertManagerConfig;
use strata_common::graph::ResourceGraph;
use strata_common::resource::{
    CustomResourceSpec, ExportSource, ResourceId, ResourceNode, SecretSpec, SecretType,
};
use strata_common::{Error, Result};
use tracing::debug;

use super::cert_manager::{webhook_dependency, CertManagerIds};
use super::{app_labels, to_value, CERT_MANAGER_API_VERSION};
use crate::pki::TrustMaterial;

/// Annotation declaring an apply-order dependency for manifest tooling
pub const DEPENDS_ON_ANNOTATION: &str = "config.kubernetes.io/depends-on";

/// CA reference in a ClusterIssuer spec
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    /// Secret holding the CA pair
    pub secret_name: String,
}

/// Spec of a CA-backed `ClusterIssuer`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusterIssuerSpec {
    /// CA reference
    pub ca: CaIssuer,
}

/// Ids of the issuer resources
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerIds {
    /// The CA secret
    pub ca_secret: ResourceId,
    /// The ClusterIssuer
    pub issuer: ResourceId,
}

impl IssuerIds {
    /// Name workload certificates reference in their `issuerRef`
    pub fn issuer_name(&self) -> &str {
        &self.issuer.name
    }
}

/// Plans the CA secret and the ClusterIssuer
#[derive(Clone, Debug)]
pub struct IssuerProvisioner {
    namespace: String,
    issuer_name: String,
    ca_secret_name: String,
}

impl IssuerProvisioner {
    /// Provisioner for the issuer and secret named in `config`
    pub fn new(config: &CertManagerConfig) -> Result<Self> {
        for (field, value) in [
            ("issuerName", &config.issuer_name),
            ("caSecretName", &config.ca_secret_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation_for_field(
                    "ClusterIssuer",
                    field,
                    "must not be empty",
                ));
            }
        }
        Ok(Self {
            namespace: config.namespace.clone(),
            issuer_name: config.issuer_name.clone(),
            ca_secret_name: config.ca_secret_name.clone(),
        })
    }

    /// Insert the CA secret and issuer, then register the CA exports
    pub fn plan(
        &self,
        graph: &mut ResourceGraph,
        trust: &TrustMaterial,
        cert_manager: &CertManagerIds,
    ) -> Result<IssuerIds> {
        let ca_secret = graph.insert(
            ResourceNode::secret(
                &self.ca_secret_name,
                &self.namespace,
                SecretSpec {
                    type_: SecretType::Tls,
                    labels: app_labels("cert-manager"),
                    string_data: trust.secret_data(),
                },
            )
            .after([&cert_manager.namespace]),
        )?;

        let issuer = graph.insert(
            ResourceNode::custom(
                CERT_MANAGER_API_VERSION,
                "ClusterIssuer",
                &self.issuer_name,
                None,
                CustomResourceSpec {
                    labels: BTreeMap::new(),
                    annotations: BTreeMap::from([(
                        DEPENDS_ON_ANNOTATION.to_string(),
                        webhook_dependency(&self.namespace),
                    )]),
                    spec: self.issuer_spec()?,
                },
            )
            .after([&ca_secret, &cert_manager.chart]),
        )?;

        graph.export(
            "selfSignedCertKey",
            ExportSource::ValueOf {
                resource: ca_secret.clone(),
                value: Value::String(trust.key_pem().to_string()),
            },
            true,
        )?;
        graph.export(
            "selfSignedCertPem",
            ExportSource::ValueOf {
                resource: ca_secret.clone(),
                value: Value::String(trust.cert_pem().to_string()),
            },
            false,
        )?;

        debug!(issuer = %self.issuer_name, secret = %self.ca_secret_name, "planned CA issuer");
        Ok(IssuerIds { ca_secret, issuer })
    }

    fn issuer_spec(&self) -> Result<Value> {
        to_value(
            &ClusterIssuerSpec {
                ca: CaIssuer {
                    secret_name: self.ca_secret_name.clone(),
                },
            },
            "ClusterIssuer",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::cert_manager::CertManagerDeployer;
    use strata_common::engine::RecordingEngine;
    use strata_common::graph::Orchestrator;
    use strata_common::resource::ResourceSpec;

    fn planned() -> (ResourceGraph, CertManagerIds, IssuerIds) {
        let config = CertManagerConfig::default();
        let mut graph = ResourceGraph::new();
        let cm = CertManagerDeployer::new(&config, true)
            .unwrap()
            .plan(&mut graph)
            .unwrap();
        let trust = TrustMaterial::from_pem("KEY", "CERT");
        let ids = IssuerProvisioner::new(&config)
            .unwrap()
            .plan(&mut graph, &trust, &cm)
            .unwrap();
        (graph, cm, ids)
    }

    #[test]
    fn test_ca_secret_shape() {
        let (graph, cm, ids) = planned();
        let node = graph.get(&ids.ca_secret).unwrap();
        assert_eq!(node.predecessors(), &[cm.namespace]);

        let manifest = node.manifest().unwrap();
        assert_eq!(manifest["type"], "kubernetes.io/tls");
        assert_eq!(manifest["metadata"]["namespace"], "cert-manager");
        assert_eq!(manifest["metadata"]["name"], "cert-manager-ca-cert");
        assert_eq!(manifest["stringData"]["tls.key"], "KEY");
        assert_eq!(manifest["stringData"]["tls.crt"], "CERT");
    }

    #[test]
    fn test_cluster_issuer_is_cluster_scoped() {
        let (graph, cm, ids) = planned();
        assert_eq!(ids.issuer_name(), "internal-cluster-issuer");
        assert!(ids.issuer.namespace.is_none());

        let node = graph.get(&ids.issuer).unwrap();
        assert_eq!(node.predecessors(), &[ids.ca_secret.clone(), cm.chart]);
        match node.spec() {
            ResourceSpec::Custom(spec) => {
                assert_eq!(spec.spec["ca"]["secretName"], "cert-manager-ca-cert");
                assert_eq!(
                    spec.annotations[DEPENDS_ON_ANNOTATION],
                    "/namespaces/cert-manager/Deployment/cert-manager-webhook"
                );
            }
            other => panic!("Expected custom resource, got {:?}", other),
        }

        let manifest = node.manifest().unwrap();
        assert_eq!(manifest["apiVersion"], "cert-manager.io/v1");
        assert!(manifest["metadata"].get("namespace").is_none());
    }

    #[test]
    fn test_ca_exports() {
        let (graph, _, ids) = planned();
        let key = graph
            .exports()
            .iter()
            .find(|e| e.key == "selfSignedCertKey")
            .unwrap();
        assert!(key.secret);
        let pem = graph
            .exports()
            .iter()
            .find(|e| e.key == "selfSignedCertPem")
            .unwrap();
        assert!(!pem.secret);
        assert_eq!(
            pem.source,
            ExportSource::ValueOf {
                resource: ids.ca_secret.clone(),
                value: Value::String("CERT".into()),
            }
        );
    }

    /// Story: the CA pair is only published once its secret is stored
    #[tokio::test]
    async fn story_ca_exports_follow_secret() {
        let (graph, _, ids) = planned();
        let engine = RecordingEngine::new().fail_on(&ids.ca_secret, "secret quota exceeded");

        let err = Orchestrator::new(&engine).deploy(&graph).await.unwrap_err();
        assert_eq!(err.resource(), Some(ids.ca_secret.to_string().as_str()));

        let keys: Vec<_> = engine.exports().into_iter().map(|e| e.key).collect();
        assert!(keys.contains(&"certManagerNamespace".to_string()));
        assert!(!keys.contains(&"selfSignedCertKey".to_string()));
        assert!(!keys.contains(&"selfSignedCertPem".to_string()));
        assert!(!engine.attempted().contains(&ids.issuer));
    }

    #[test]
    fn test_empty_secret_name_rejected() {
        let config = CertManagerConfig {
            ca_secret_name: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            IssuerProvisioner::new(&config),
            Err(Error::Validation { .. })
        ));
    }
}
