//! Deployment scenarios against the in-memory engine
//!
//! Each test builds a graph the way a deployer would, runs it through the
//! orchestrator on a [`RecordingEngine`] and checks what reached the engine,
//! in which order, and with which predecessor handles.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use strata_common::config::StackConfig;
use strata_common::engine::RecordingEngine;
use strata_common::graph::{Orchestrator, ResourceGraph};
use strata_common::policy::{AclGrammar, Credential, PolicyCompiler, ReplicationUsers};
use strata_common::resource::{
    ChartSpec, CustomResourceSpec, ExportSource, ResourceId, ResourceKind, ResourceNode,
    SecretSpec, SecretType,
};
use strata_common::Error;
use strata_infra::bootstrap::{app_labels, CertificateSpec};
use strata_infra::pki::{BootstrapConfig, CertificateBootstrap, Environment, TrustMaterial};
use strata_infra::{deploy_stack, plan_stack};

fn ca() -> &'static TrustMaterial {
    static CA: OnceLock<TrustMaterial> = OnceLock::new();
    CA.get_or_init(|| {
        CertificateBootstrap::new(BootstrapConfig::default())
            .bootstrap(Environment::Local)
            .expect("local bootstrap should succeed")
    })
}

fn tls_secret(name: &str, ns: &str) -> ResourceNode {
    ResourceNode::secret(
        name,
        ns,
        SecretSpec {
            type_: SecretType::Tls,
            labels: BTreeMap::new(),
            string_data: ca().secret_data(),
        },
    )
}

fn issuer(name: &str, secret: &str) -> ResourceNode {
    ResourceNode::custom(
        "cert-manager.io/v1",
        "ClusterIssuer",
        name,
        None,
        CustomResourceSpec {
            spec: serde_json::json!({ "ca": { "secretName": secret } }),
            ..Default::default()
        },
    )
}

fn cache_chart(acl: &str) -> ChartSpec {
    ChartSpec {
        chart: "oci://ghcr.io/dragonflydb/dragonfly/helm/dragonfly".to_string(),
        repo: None,
        version: "v1.30.3".to_string(),
        values: serde_json::json!({ "acl": acl }),
    }
}

fn ids(records: &[ResourceId]) -> Vec<String> {
    records.iter().map(ToString::to_string).collect()
}

/// Story: a cache namespace, its CA, issuer, certificate and chart deploy in
/// order with a single application user
#[tokio::test]
async fn story_cache_stack_deploys_in_order() {
    let credentials =
        vec![Credential::new("test", "test", ["+AUTH", "+PING", "+GET", "+SET", "~*"]).unwrap()];
    let policy = PolicyCompiler::new(AclGrammar::AppendOnly)
        .require_credentials(true)
        .compile(&credentials)
        .unwrap();

    let mut graph = ResourceGraph::new();
    let ns = graph
        .insert(ResourceNode::namespace("cache", app_labels("cache")))
        .unwrap();
    let secret = graph
        .insert(tls_secret("cache-ca", "cache").after([&ns]))
        .unwrap();
    let iss = graph
        .insert(issuer("cache-issuer", "cache-ca").after([&secret]))
        .unwrap();
    let cert = graph
        .insert(
            CertificateSpec::for_services("cache", "cache", &["cache"], "cache-issuer", "cache-tls")
                .unwrap()
                .into_node("cache-certificate", "cache", app_labels("cache"))
                .unwrap()
                .after([&ns, &iss]),
        )
        .unwrap();
    let chart = graph
        .insert(ResourceNode::chart("cache", "cache", cache_chart(policy.text())).after([&ns, &cert]))
        .unwrap();

    let engine = RecordingEngine::new();
    let deployed = Orchestrator::new(&engine).deploy(&graph).await.unwrap();

    assert_eq!(
        ids(&engine.applied_ids()),
        vec![
            "Namespace/cache",
            "Secret/cache/cache-ca",
            "ClusterIssuer/cache-issuer",
            "Certificate/cache/cache-certificate",
            "Chart/cache/cache",
        ]
    );
    assert_eq!(deployed.handles.len(), 5);
    assert!(deployed.handles.iter().all(|h| h.run_id == deployed.run_id));
    assert_eq!(
        deployed.handle(&chart).map(|h| h.status.clone()),
        Some(serde_json::json!({ "status": "deployed" }))
    );

    let chart_record = engine
        .applied()
        .into_iter()
        .find(|r| r.id == chart)
        .unwrap();
    assert_eq!(
        chart_record.manifest["values"]["acl"],
        "user default on nopass -@ALL +PING +AUTH\n\
         user test on >test +AUTH +PING +GET +SET ~*\n\
         appendonly yes\n\
         save \"\"\n"
    );
}

/// Story: a certificate that forgets the issuer still gates the chart, and the
/// chart sees the namespace through the certificate
#[tokio::test]
async fn story_missing_issuer_edge_keeps_chart_behind_certificate() {
    let mut graph = ResourceGraph::new();
    let ns = graph
        .insert(ResourceNode::namespace("cache", BTreeMap::new()))
        .unwrap();
    let secret = graph
        .insert(tls_secret("cache-ca", "cache").after([&ns]))
        .unwrap();
    graph
        .insert(issuer("cache-issuer", "cache-ca").after([&secret]))
        .unwrap();
    let cert = graph
        .insert(
            CertificateSpec::for_services("cache", "cache", &["cache"], "cache-issuer", "cache-tls")
                .unwrap()
                .into_node("cache-certificate", "cache", BTreeMap::new())
                .unwrap()
                .after([&ns]),
        )
        .unwrap();
    let chart = graph
        .insert(ResourceNode::chart("cache", "cache", cache_chart("x")).after([&cert]))
        .unwrap();

    let engine = RecordingEngine::new();
    Orchestrator::new(&engine).deploy(&graph).await.unwrap();
    let record = engine
        .applied()
        .into_iter()
        .find(|r| r.id == chart)
        .unwrap();
    assert_eq!(record.after, vec![cert.clone(), ns.clone()]);

    let failing = RecordingEngine::new().fail_on(&cert, "webhook not ready");
    let err = Orchestrator::new(&failing).deploy(&graph).await.unwrap_err();
    assert!(err.is_engine_failure());
    assert!(!failing.attempted().contains(&chart));
    assert_eq!(failing.applied_ids().len(), 3);
}

/// Story: a replicated cache with no application users still gets a usable
/// ACL file
#[test]
fn story_replicated_policy_without_users() {
    let users = ReplicationUsers::new("s3ntinel", "r3plica").unwrap();
    let policy = PolicyCompiler::new(AclGrammar::Replicated(users))
        .compile(&[])
        .unwrap();
    let lines: Vec<_> = policy.text().lines().collect();

    assert_eq!(lines[0], "user default on nopass -@ALL +PING +AUTH");
    assert!(lines[1].starts_with("user sentinel-user on >s3ntinel allchannels"));
    assert_eq!(lines[2], "user replica-user on >r3plica +psync +replconf +ping");
    assert_eq!(lines[3], "appendonly no");
    assert_eq!(lines[4], "save 3600 1 300 100 60 10000");
    assert_eq!(policy.credential_count(), 0);
}

#[tokio::test]
async fn test_chain_failure_stops_descendants() {
    let mut graph = ResourceGraph::new();
    let a = graph
        .insert(ResourceNode::namespace("a", BTreeMap::new()))
        .unwrap();
    let b = graph
        .insert(tls_secret("b", "a").after([&a]))
        .unwrap();
    let c = graph
        .insert(ResourceNode::chart("c", "a", cache_chart("x")).after([&b]))
        .unwrap();
    let other = graph
        .insert(ResourceNode::namespace("other", BTreeMap::new()))
        .unwrap();

    let engine = RecordingEngine::new().fail_on(&a, "apiserver unavailable");
    let err = Orchestrator::new(&engine).deploy(&graph).await.unwrap_err();

    match err {
        Error::Engine { resource, message } => {
            assert_eq!(resource, a.to_string());
            assert_eq!(message, "apiserver unavailable");
        }
        other => panic!("Expected Engine error, got {:?}", other),
    }
    assert_eq!(engine.attempted(), vec![a, other.clone()]);
    assert!(!engine.attempted().contains(&b));
    assert!(!engine.attempted().contains(&c));
    assert_eq!(engine.applied_ids(), vec![other]);
}

/// Story: the full default stack deploys on a fresh cluster and publishes its
/// exports
#[tokio::test]
async fn story_full_stack_local() {
    let config = StackConfig {
        local: true,
        ..Default::default()
    };
    let engine = RecordingEngine::new();
    let deployed = deploy_stack(&engine, &config).await.unwrap();

    assert_eq!(deployed.handles.len(), 12);
    let keys: Vec<_> = deployed.exports.iter().map(|e| e.key.as_str()).collect();
    assert!(keys.contains(&"certManagerStatus"));
    assert!(keys.contains(&"dragonflyStatus"));

    let key = deployed
        .exports
        .iter()
        .find(|e| e.key == "selfSignedCertKey")
        .unwrap();
    assert!(key.secret);
    assert_eq!(key.display_value(false), serde_json::json!("[secret]"));

    let issuer_record = engine
        .applied()
        .into_iter()
        .find(|r| r.id.name == "internal-cluster-issuer")
        .unwrap();
    let after: Vec<_> = issuer_record.after.iter().map(|id| id.kind.clone()).collect();
    assert_eq!(after[0], ResourceKind::Secret);
    assert_eq!(after[1], ResourceKind::Chart);
}

/// Story: a second run reuses the CA already stored in the cluster
#[tokio::test]
async fn story_existing_ca_is_reused() {
    let config = StackConfig {
        local: true,
        ..Default::default()
    };
    let engine = RecordingEngine::new().with_secret(
        "cert-manager",
        "cert-manager-ca-cert",
        ca().secret_data(),
    );
    let deployed = deploy_stack(&engine, &config).await.unwrap();

    let pem = deployed
        .exports
        .iter()
        .find(|e| e.key == "selfSignedCertPem")
        .unwrap();
    assert_eq!(pem.value, serde_json::json!(ca().cert_pem()));
}

#[tokio::test]
async fn test_managed_cluster_is_unimplemented() {
    let engine = RecordingEngine::new();
    let err = deploy_stack(&engine, &StackConfig::default())
        .await
        .unwrap_err();
    assert!(err.is_unimplemented());
    assert!(engine.attempted().is_empty());
    assert!(engine.exports().is_empty());
}

/// Story: cert-manager failing to install blocks every workload, while the
/// namespace export still reports where it was headed
#[tokio::test]
async fn story_cert_manager_failure_blocks_workloads() {
    let config = StackConfig {
        local: true,
        ..Default::default()
    };
    let graph = plan_stack(&config, ca()).unwrap();
    let chart = ResourceId::new(ResourceKind::Chart, "cert-manager", Some("cert-manager"));
    let engine = RecordingEngine::new().fail_on(&chart, "helm timed out");

    let err = Orchestrator::new(&engine).deploy(&graph).await.unwrap_err();
    assert_eq!(err.resource(), Some(chart.to_string().as_str()));

    let applied = ids(&engine.applied_ids());
    assert!(applied.contains(&"Namespace/valkey".to_string()));
    assert!(applied.contains(&"Secret/valkey/valkey-acl".to_string()));
    assert!(!applied.iter().any(|id| id.starts_with("Certificate/")));
    assert!(!applied.iter().any(|id| id.starts_with("Chart/")));

    let keys: Vec<_> = engine.exports().into_iter().map(|e| e.key).collect();
    assert!(keys.contains(&"certManagerNamespace".to_string()));
    assert!(!keys.contains(&"certManagerStatus".to_string()));
    assert!(!keys.contains(&"valkeyStatus".to_string()));
    assert!(graph
        .exports()
        .iter()
        .any(|e| e.source == ExportSource::StatusOf(chart.clone())));
}
