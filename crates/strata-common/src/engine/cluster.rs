//! Kubernetes-backed engine
//!
//! Namespaces, secrets and custom resources go through server-side apply with
//! API discovery. Charts are installed by shelling out to `helm`, with values
//! piped on stdin so nothing sensitive lands on disk or in the process list.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::Discovery;
use kube::{Api, Client, Config};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{check_predecessors, ExportedValue, ResourceEngine};
use crate::resource::{ChartSpec, ResourceHandle, ResourceId, ResourceNode, ResourceSpec};
use crate::{Error, Result, DEFAULT_FIELD_MANAGER};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(
                    path.display().to_string(),
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::config(
                        path.display().to_string(),
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::config("kubeconfig", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Ok(Client::try_from(config)?)
}

/// Settings for [`KubeEngine`]
#[derive(Clone, Debug)]
pub struct KubeEngineConfig {
    /// Field manager for server-side apply
    pub field_manager: String,
    /// Upper bound for a single apply (also passed to `helm --timeout`)
    pub apply_timeout: Duration,
    /// Helm executable
    pub helm_binary: String,
    /// Kubeconfig handed to helm; the ambient one when unset
    pub kubeconfig: Option<PathBuf>,
}

impl Default for KubeEngineConfig {
    fn default() -> Self {
        Self {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            apply_timeout: Duration::from_secs(120),
            helm_binary: "helm".to_string(),
            kubeconfig: None,
        }
    }
}

/// Engine that applies resources to a live cluster
pub struct KubeEngine {
    client: Client,
    config: KubeEngineConfig,
    run_id: String,
    discovery: RwLock<Discovery>,
    issued: Mutex<HashSet<ResourceId>>,
    exports: Mutex<Vec<ExportedValue>>,
}

impl KubeEngine {
    /// Create an engine for a new run, discovering the cluster's API surface
    pub async fn new(client: Client, config: KubeEngineConfig) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        let run_id = Uuid::new_v4().to_string();
        debug!(run_id = %run_id, field_manager = %config.field_manager, "kube engine ready");
        Ok(Self {
            client,
            config,
            run_id,
            discovery: RwLock::new(discovery),
            issued: Mutex::new(HashSet::new()),
            exports: Mutex::new(Vec::new()),
        })
    }

    /// Exports published so far in this run
    pub fn exports(&self) -> Vec<ExportedValue> {
        self.exports
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    fn issued_snapshot(&self) -> Result<HashSet<ResourceId>> {
        self.issued
            .lock()
            .map(|issued| issued.clone())
            .map_err(|_| Error::engine_for(&self.run_id, "issued handle set poisoned"))
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<Option<kube::discovery::ApiResource>> {
        if let Some((resource, _)) = self.discovery.read().await.resolve_gvk(gvk) {
            return Ok(Some(resource));
        }

        // Charts install CRDs mid-run, so an unknown kind may exist by now
        debug!(group = %gvk.group, kind = %gvk.kind, "kind not discovered, refreshing");
        let refreshed = Discovery::new(self.client.clone()).run().await?;
        let resource = refreshed.resolve_gvk(gvk).map(|(resource, _)| resource);
        *self.discovery.write().await = refreshed;
        Ok(resource)
    }

    async fn apply_manifest(&self, id: &ResourceId, manifest: &Value) -> Result<ResourceHandle> {
        let api_version = manifest
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::serialization_for_kind(id.kind.name(), "missing apiVersion"))?;
        let kind = manifest
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::serialization_for_kind(id.kind.name(), "missing kind"))?;

        let (group, version) = parse_api_version(api_version);
        let gvk = GroupVersionKind {
            group,
            version,
            kind: kind.to_string(),
        };

        let Some(api_resource) = self.resolve(&gvk).await? else {
            return Err(Error::engine_for(
                id.to_string(),
                format!("unknown resource type: {}/{}", api_version, kind),
            ));
        };

        let api: Api<DynamicObject> = match &id.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        };
        let params = PatchParams::apply(&self.config.field_manager).force();

        let applied = tokio::time::timeout(
            self.config.apply_timeout,
            api.patch(&id.name, &params, &Patch::Apply(manifest)),
        )
        .await
        .map_err(|_| {
            Error::engine_for(
                id.to_string(),
                format!("apply timed out after {:?}", self.config.apply_timeout),
            )
        })?
        .map_err(|e| Error::engine_for(id.to_string(), format!("failed to apply: {}", e)))?;

        Ok(ResourceHandle {
            id: id.clone(),
            run_id: self.run_id.clone(),
            uid: applied.metadata.uid.clone(),
            status: applied.data.get("status").cloned().unwrap_or(Value::Null),
        })
    }

    async fn install_chart(&self, id: &ResourceId, chart: &ChartSpec) -> Result<ResourceHandle> {
        let namespace = id.namespace.as_deref().ok_or_else(|| {
            Error::validation_for_field(id.to_string(), "namespace", "charts must be namespaced")
        })?;
        let values = serde_yaml::to_string(&chart.values)
            .map_err(|e| Error::serialization_for_kind("Chart", e.to_string()))?;

        let args = helm_upgrade_args(
            &id.name,
            namespace,
            chart,
            self.config.apply_timeout.as_secs(),
        );
        debug!(release = %id.name, chart = %chart.chart, version = %chart.version, "running helm upgrade");
        self.run_helm(id, &args, Some(&values)).await?;

        let status_args = vec![
            "status".to_string(),
            id.name.clone(),
            "--namespace".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let stdout = self.run_helm(id, &status_args, None).await?;
        let release: Value = serde_json::from_str(&stdout)
            .map_err(|e| Error::serialization_for_kind("Chart", format!("helm status: {}", e)))?;

        Ok(ResourceHandle {
            id: id.clone(),
            run_id: self.run_id.clone(),
            uid: None,
            status: release.get("info").cloned().unwrap_or(Value::Null),
        })
    }

    async fn run_helm(&self, id: &ResourceId, args: &[String], stdin: Option<&str>) -> Result<String> {
        let mut child = helm_command(&self.config, args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .spawn()
            .map_err(|e| Error::engine_for(id.to_string(), format!("helm: {}", e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| Error::engine_for(id.to_string(), format!("helm stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::engine_for(id.to_string(), format!("helm: {}", e)))?;

        if !output.status.success() {
            return Err(Error::engine_for(
                id.to_string(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ResourceEngine for KubeEngine {
    fn run_id(&self) -> String {
        self.run_id.clone()
    }

    async fn apply(&self, node: &ResourceNode, after: &[ResourceHandle]) -> Result<ResourceHandle> {
        check_predecessors(node, after, &self.run_id, &self.issued_snapshot()?)?;

        let handle = match node.spec() {
            ResourceSpec::Chart(chart) => self.install_chart(node.id(), chart).await?,
            _ => self.apply_manifest(node.id(), &node.manifest()?).await?,
        };

        self.issued
            .lock()
            .map_err(|_| Error::engine_for(node.id().to_string(), "issued handle set poisoned"))?
            .insert(node.id().clone());
        Ok(handle)
    }

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = secrets.get_opt(name).await? else {
            return Ok(None);
        };

        let mut data = BTreeMap::new();
        for (key, bytes) in secret.data.unwrap_or_default() {
            let value = String::from_utf8(bytes.0).map_err(|_| {
                Error::serialization_for_kind(
                    "Secret",
                    format!("{}/{} key {} is not UTF-8", namespace, name, key),
                )
            })?;
            data.insert(key, value);
        }
        Ok(Some(data))
    }

    async fn export(&self, key: &str, value: &Value, secret: bool) -> Result<()> {
        let exported = ExportedValue {
            key: key.to_string(),
            value: value.clone(),
            secret,
        };
        info!(run_id = %self.run_id, key = %key, value = %exported.display_value(false), "export");
        self.exports
            .lock()
            .map_err(|_| Error::engine_for(key, "export list poisoned"))?
            .push(exported);
        Ok(())
    }
}

/// Split an apiVersion into (group, version); core resources have an empty group
pub(crate) fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Helm invocation bound to the same cluster as the kube client
pub(crate) fn helm_command(config: &KubeEngineConfig, args: &[String]) -> Command {
    let mut command = Command::new(&config.helm_binary);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(kubeconfig) = &config.kubeconfig {
        command.env("KUBECONFIG", kubeconfig);
    }
    command
}

/// Arguments for an idempotent `helm upgrade --install`, values read from stdin
pub(crate) fn helm_upgrade_args(
    release: &str,
    namespace: &str,
    chart: &ChartSpec,
    timeout_secs: u64,
) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.to_string(),
        chart.chart.clone(),
        "--namespace".to_string(),
        namespace.to_string(),
        "--version".to_string(),
        chart.version.clone(),
    ];
    if let Some(repo) = &chart.repo {
        args.push("--repo".to_string());
        args.push(repo.clone());
    }
    args.extend([
        "--values".to_string(),
        "-".to_string(),
        "--wait".to_string(),
        "--timeout".to_string(),
        format!("{}s", timeout_secs),
    ]);
    args
}
