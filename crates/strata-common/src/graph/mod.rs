//! Resource graph and deployment orchestrator
//!
//! The graph is built once per run by appending nodes in the order the caller
//! wants them issued. A node may only name predecessors that were inserted
//! before it, so the predecessor relation is acyclic by construction and
//! insertion order is already a valid topological order.
//!
//! The orchestrator walks that order. A node is applied only after every one of
//! its transitive predecessors was applied in the same run; if any of them
//! failed or was skipped, the node is skipped and never reaches the engine.
//! Independent branches keep going, and the first failure is returned once the
//! walk is over.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::engine::{ExportedValue, ResourceEngine};
use crate::resource::{Export, ExportSource, ResourceHandle, ResourceId, ResourceKind, ResourceNode};
use crate::{Error, Result};

/// Caller-ordered graph of resource nodes
#[derive(Debug, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<ResourceId, usize>,
    exports: Vec<Export>,
}

impl ResourceGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node, returning its id
    ///
    /// Fails with a dependency violation if the id is already present or a
    /// predecessor has not been inserted yet.
    pub fn insert(&mut self, node: ResourceNode) -> Result<ResourceId> {
        let id = node.id().clone();
        if self.index.contains_key(&id) {
            return Err(Error::dependency_violation(
                id.to_string(),
                id.to_string(),
                "resource already present in the graph",
            ));
        }
        for predecessor in node.predecessors() {
            if !self.index.contains_key(predecessor) {
                return Err(Error::dependency_violation(
                    id.to_string(),
                    predecessor.to_string(),
                    "predecessor must be inserted before its dependents",
                ));
            }
        }

        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(id)
    }

    /// Register a named output
    pub fn export(&mut self, key: impl Into<String>, source: ExportSource, secret: bool) -> Result<()> {
        let key = key.into();
        if self.exports.iter().any(|e| e.key == key) {
            return Err(Error::validation_for_field(
                "exports",
                key,
                "export key registered twice",
            ));
        }
        if let Some(resource) = source.resource() {
            if !self.contains(resource) {
                return Err(Error::dependency_violation(
                    format!("export {}", key),
                    resource.to_string(),
                    "export source is not in the graph",
                ));
            }
        }
        self.exports.push(Export { key, source, secret });
        Ok(())
    }

    /// Whether a node with this id was inserted
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Look up a node
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Registered exports in registration order
    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All transitive predecessors of `id`, in insertion order
    pub fn ancestors(&self, id: &ResourceId) -> Vec<ResourceId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&ResourceId> = self
            .get(id)
            .map(|n| n.predecessors().iter().collect())
            .unwrap_or_default();

        while let Some(current) = stack.pop() {
            if seen.insert(current.clone()) {
                if let Some(node) = self.get(current) {
                    stack.extend(node.predecessors());
                }
            }
        }

        let mut ancestors: Vec<ResourceId> = seen.into_iter().collect();
        ancestors.sort_by_key(|a| self.index.get(a).copied().unwrap_or(usize::MAX));
        ancestors
    }
}

/// Result of a deployment run that issued every node
#[derive(Debug)]
pub struct DeployedResources {
    /// Id of the run
    pub run_id: String,
    /// Handles in issue order
    pub handles: Vec<ResourceHandle>,
    /// Exports published at the end of the run
    pub exports: Vec<ExportedValue>,
}

impl DeployedResources {
    /// Handle for a deployed resource
    pub fn handle(&self, id: &ResourceId) -> Option<&ResourceHandle> {
        self.handles.iter().find(|h| &h.id == id)
    }
}

#[derive(Debug)]
enum Outcome {
    Applied(ResourceHandle),
    Failed,
    Skipped,
}

/// Walks a [`ResourceGraph`] and issues each node to an engine
pub struct Orchestrator<'a, E: ResourceEngine + ?Sized> {
    engine: &'a E,
}

impl<'a, E: ResourceEngine + ?Sized> Orchestrator<'a, E> {
    /// Create an orchestrator over an engine
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Deploy every node of the graph in insertion order
    ///
    /// Exports whose source resource was applied are published even when the
    /// run fails; the first failure is then returned unchanged. A failed
    /// export surfaces only when no resource failed before it.
    pub async fn deploy(&self, graph: &ResourceGraph) -> Result<DeployedResources> {
        let run_id = self.engine.run_id();
        let mut outcomes: HashMap<&ResourceId, Outcome> = HashMap::new();
        let mut handles = Vec::new();
        let mut first_error: Option<Error> = None;

        info!(run_id = %run_id, resources = graph.len(), "starting deployment");

        for node in graph.nodes() {
            let id = node.id();
            let ancestors = graph.ancestors(id);

            if let Some(blocked_by) = ancestors
                .iter()
                .find(|a| !matches!(outcomes.get(a), Some(Outcome::Applied(_))))
            {
                warn!(
                    run_id = %run_id,
                    resource = %id,
                    blocked_by = %blocked_by,
                    "skipping resource, predecessor did not deploy"
                );
                outcomes.insert(id, Outcome::Skipped);
                continue;
            }

            let after = predecessor_handles(node, &ancestors, &outcomes);
            let result = match self.engine.apply(node, &after).await {
                Ok(handle) if handle.id != *id || handle.run_id != run_id => {
                    Err(Error::dependency_violation(
                        id.to_string(),
                        handle.id.to_string(),
                        format!(
                            "engine returned a handle for {} in run {}",
                            handle.id, handle.run_id
                        ),
                    ))
                }
                other => other,
            };

            match result {
                Ok(handle) => {
                    info!(run_id = %run_id, resource = %id, uid = ?handle.uid, "resource applied");
                    handles.push(handle.clone());
                    outcomes.insert(id, Outcome::Applied(handle));
                }
                Err(err) => {
                    error!(run_id = %run_id, resource = %id, error = %err, "resource failed");
                    outcomes.insert(id, Outcome::Failed);
                    first_error.get_or_insert(err);
                }
            }
        }

        let mut exports = Vec::new();
        for export in graph.exports() {
            let Some(value) = resolve_export(&export.source, &outcomes) else {
                continue;
            };
            if let Err(err) = self.engine.export(&export.key, &value, export.secret).await {
                error!(run_id = %run_id, key = %export.key, error = %err, "export failed");
                first_error.get_or_insert(err);
                continue;
            }
            exports.push(ExportedValue {
                key: export.key.clone(),
                value,
                secret: export.secret,
            });
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        info!(run_id = %run_id, applied = handles.len(), "deployment complete");
        Ok(DeployedResources {
            run_id,
            handles,
            exports,
        })
    }
}

/// Direct predecessors first (declaration order), then the remaining
/// ancestors in insertion order
fn predecessor_handles(
    node: &ResourceNode,
    ancestors: &[ResourceId],
    outcomes: &HashMap<&ResourceId, Outcome>,
) -> Vec<ResourceHandle> {
    let direct = node.predecessors().iter();
    let indirect = ancestors
        .iter()
        .filter(|a| !node.predecessors().contains(a));

    direct
        .chain(indirect)
        .filter_map(|id| match outcomes.get(id) {
            Some(Outcome::Applied(handle)) => Some(handle.clone()),
            _ => None,
        })
        .collect()
}

fn resolve_export(source: &ExportSource, outcomes: &HashMap<&ResourceId, Outcome>) -> Option<Value> {
    match source {
        ExportSource::Literal(value) => Some(value.clone()),
        ExportSource::NamespaceOf(id) => match outcomes.get(id) {
            Some(Outcome::Applied(_)) => {
                let namespace = match (&id.kind, &id.namespace) {
                    (ResourceKind::Namespace, _) => id.name.clone(),
                    (_, Some(ns)) => ns.clone(),
                    (_, None) => return None,
                };
                Some(Value::String(namespace))
            }
            _ => None,
        },
        ExportSource::StatusOf(id) => match outcomes.get(id) {
            Some(Outcome::Applied(handle)) => Some(handle.status.clone()),
            _ => None,
        },
        ExportSource::ValueOf { resource, value } => match outcomes.get(resource) {
            Some(Outcome::Applied(_)) => Some(value.clone()),
            _ => None,
        },
    }
}
