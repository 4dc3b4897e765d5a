//! In-memory engine
//!
//! Records every apply instead of performing it. Backs `strata plan`,
//! `strata deploy --dry-run` and the deployment tests. It enforces the same
//! predecessor checks as the cluster engine, so a plan that records cleanly
//! issues nodes in an order the cluster engine accepts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{check_predecessors, ExportedValue, ResourceEngine};
use crate::resource::{ResourceHandle, ResourceId, ResourceKind, ResourceNode, ResourceSpec};
use crate::{Error, Result};

/// One recorded apply
#[derive(Clone, Debug)]
pub struct AppliedRecord {
    /// The applied resource
    pub id: ResourceId,
    /// Ids of the handles the resource was applied after, in the order given
    pub after: Vec<ResourceId>,
    /// The rendered manifest (release description for charts)
    pub manifest: Value,
}

#[derive(Default)]
struct State {
    applied: Vec<AppliedRecord>,
    attempted: Vec<ResourceId>,
    issued: HashSet<ResourceId>,
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    failures: HashMap<ResourceId, String>,
    exports: Vec<ExportedValue>,
}

/// Engine that records applies in memory
pub struct RecordingEngine {
    run_id: String,
    state: Mutex<State>,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    /// Create an empty engine with a fresh run id
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Pre-seed a secret as if it already existed in the cluster
    pub fn with_secret(self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> Self {
        self.lock()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
        self
    }

    /// Make applying `id` fail with `message`
    pub fn fail_on(self, id: &ResourceId, message: impl Into<String>) -> Self {
        self.lock().failures.insert(id.clone(), message.into());
        self
    }

    /// Successful applies in issue order
    pub fn applied(&self) -> Vec<AppliedRecord> {
        self.lock().applied.clone()
    }

    /// Ids of successful applies in issue order
    pub fn applied_ids(&self) -> Vec<ResourceId> {
        self.lock().applied.iter().map(|r| r.id.clone()).collect()
    }

    /// Every resource the engine was asked to apply, including failures
    pub fn attempted(&self) -> Vec<ResourceId> {
        self.lock().attempted.clone()
    }

    /// Exports published so far
    pub fn exports(&self) -> Vec<ExportedValue> {
        self.lock().exports.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // No code panics while holding the lock
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn recorded_status(kind: &ResourceKind) -> Value {
    match kind {
        ResourceKind::Namespace => json!({ "phase": "Active" }),
        ResourceKind::Chart => json!({ "status": "deployed" }),
        _ => json!({}),
    }
}

#[async_trait]
impl ResourceEngine for RecordingEngine {
    fn run_id(&self) -> String {
        self.run_id.clone()
    }

    async fn apply(&self, node: &ResourceNode, after: &[ResourceHandle]) -> Result<ResourceHandle> {
        let manifest = node.manifest()?;
        let mut state = self.lock();
        state.attempted.push(node.id().clone());

        check_predecessors(node, after, &self.run_id, &state.issued)?;

        if let Some(message) = state.failures.get(node.id()) {
            return Err(Error::engine_for(node.id().to_string(), message.clone()));
        }

        if let (ResourceSpec::Secret(secret), Some(ns)) = (node.spec(), &node.id().namespace) {
            state.secrets.insert(
                (ns.clone(), node.id().name.clone()),
                secret.string_data.clone(),
            );
        }

        state.issued.insert(node.id().clone());
        state.applied.push(AppliedRecord {
            id: node.id().clone(),
            after: after.iter().map(|h| h.id.clone()).collect(),
            manifest,
        });

        Ok(ResourceHandle {
            id: node.id().clone(),
            run_id: self.run_id.clone(),
            uid: Some(Uuid::new_v4().to_string()),
            status: recorded_status(&node.id().kind),
        })
    }

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self
            .lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn export(&self, key: &str, value: &Value, secret: bool) -> Result<()> {
        self.lock().exports.push(ExportedValue {
            key: key.to_string(),
            value: value.clone(),
            secret,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{SecretSpec, SecretType};

    fn secret_node(name: &str, ns: &str) -> ResourceNode {
        ResourceNode::secret(
            name,
            ns,
            SecretSpec {
                type_: SecretType::Opaque,
                labels: BTreeMap::new(),
                string_data: BTreeMap::from([("k".to_string(), "v".to_string())]),
            },
        )
    }

    #[tokio::test]
    async fn test_records_applies_with_predecessors() {
        let engine = RecordingEngine::new();
        let ns = ResourceNode::namespace("cache", BTreeMap::new());
        let secret = secret_node("acl", "cache").after([ns.id()]);

        let ns_handle = engine.apply(&ns, &[]).await.unwrap();
        engine.apply(&secret, &[ns_handle]).await.unwrap();

        let applied = engine.applied();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[1].id, *secret.id());
        assert_eq!(applied[1].after, vec![ns.id().clone()]);
        assert_eq!(applied[1].manifest["kind"], "Secret");
    }

    #[tokio::test]
    async fn test_applied_secret_becomes_readable() {
        let engine = RecordingEngine::new();
        engine.apply(&secret_node("acl", "cache"), &[]).await.unwrap();
        let data = engine.read_secret("cache", "acl").await.unwrap();
        assert_eq!(data.unwrap().get("k").map(String::as_str), Some("v"));
        assert!(engine.read_secret("cache", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_seeded_secret() {
        let engine = RecordingEngine::new().with_secret(
            "cert-manager",
            "ca",
            BTreeMap::from([("tls.crt".to_string(), "CRT".to_string())]),
        );
        let data = engine.read_secret("cert-manager", "ca").await.unwrap();
        assert!(data.is_some());
    }

    #[tokio::test]
    async fn test_injected_failure_is_attempted_not_applied() {
        let ns = ResourceNode::namespace("cache", BTreeMap::new());
        let engine = RecordingEngine::new().fail_on(ns.id(), "quota exceeded");

        let err = engine.apply(&ns, &[]).await.unwrap_err();
        match err {
            Error::Engine { message, .. } => assert_eq!(message, "quota exceeded"),
            other => panic!("Expected Engine error, got {:?}", other),
        }
        assert!(engine.applied().is_empty());
        assert_eq!(engine.attempted(), vec![ns.id().clone()]);
    }

    #[tokio::test]
    async fn test_handle_from_other_engine_rejected() {
        let first = RecordingEngine::new();
        let second = RecordingEngine::new();
        let ns = ResourceNode::namespace("cache", BTreeMap::new());
        let secret = secret_node("acl", "cache").after([ns.id()]);

        let foreign = first.apply(&ns, &[]).await.unwrap();
        let err = second.apply(&secret, &[foreign]).await.unwrap_err();
        assert!(matches!(err, Error::DependencyViolation { .. }));
        assert!(second.applied().is_empty());
    }
}
