//! Nodes and the actions they run.
//!
//! A node's action is pure computation: it receives the outputs of its
//! dependencies keyed by dependency id and returns its own output.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::layer::{Layer, UNLAYERED};

/// Outputs of a node's dependencies, keyed by dependency id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeInputs {
    values: HashMap<String, Value>,
}

impl NodeInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dependency_id: impl Into<String>, value: Value) {
        self.values.insert(dependency_id.into(), value);
    }

    pub fn get(&self, dependency_id: &str) -> Option<&Value> {
        self.values.get(dependency_id)
    }

    /// Deserialize a dependency's output into `T`
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, dependency_id: &str) -> anyhow::Result<T> {
        let value = self
            .values
            .get(dependency_id)
            .ok_or_else(|| anyhow::anyhow!("Input '{}' not found", dependency_id))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("Failed to deserialize input '{}': {}", dependency_id, e))
    }

    pub fn contains(&self, dependency_id: &str) -> bool {
        self.values.contains_key(dependency_id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.values()
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.values
    }
}

impl From<HashMap<String, Value>> for NodeInputs {
    fn from(values: HashMap<String, Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<(String, Value)> for NodeInputs {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// NodeAction - the work a node performs
#[async_trait]
pub trait NodeAction: Send + Sync {
    /// Get the name of this action
    fn name(&self) -> &str;

    /// Produce this node's output from its dependencies' outputs
    async fn execute(&self, inputs: NodeInputs) -> anyhow::Result<Value>;
}

type BoxedActionFn = dyn Fn(NodeInputs) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// Wrapper turning an async closure into a [`NodeAction`]
pub struct FunctionAction {
    name: String,
    func: Arc<BoxedActionFn>,
}

impl FunctionAction {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(NodeInputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |inputs| Box::pin(func(inputs))),
        }
    }
}

#[async_trait]
impl NodeAction for FunctionAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, inputs: NodeInputs) -> anyhow::Result<Value> {
        (self.func)(inputs).await
    }
}

/// Resource hints carried for visualization and planning; never enforced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// CPU share (0-1)
    pub cpu: f64,
    pub memory_mb: u64,
    pub db_connections: u32,
}

/// Auxiliary node information; none of it affects scheduling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub description: Option<String>,
    /// Expected duration, compared against the measured one for warnings
    pub estimated_execution_ms: Option<u64>,
    pub resource_requirements: Option<ResourceRequirements>,
}

/// A node in the graph.
#[derive(Clone)]
pub struct Node {
    /// Unique id, `<Prefix>^<layer>-<suffix>`
    pub id: String,
    /// Ids of nodes whose outputs this node needs
    pub dependencies: Vec<String>,
    /// Overwritten from `id` when the node is registered
    pub layer: Layer,
    pub action: Arc<dyn NodeAction>,
    pub metadata: NodeMetadata,
}

impl Node {
    pub fn new(id: impl Into<String>, action: Arc<dyn NodeAction>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            layer: UNLAYERED,
            action,
            metadata: NodeMetadata::default(),
        }
    }

    /// Build a node from an async closure
    pub fn from_fn<F, Fut>(id: impl Into<String>, func: F) -> Self
    where
        F: Fn(NodeInputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let id = id.into();
        let action = Arc::new(FunctionAction::new(id.clone(), func));
        Self::new(id, action)
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn with_estimated_execution_ms(mut self, estimate_ms: u64) -> Self {
        self.metadata.estimated_execution_ms = Some(estimate_ms);
        self
    }

    pub fn with_resource_requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.metadata.resource_requirements = Some(requirements);
        self
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("layer", &self.layer)
            .field("action", &self.action.name())
            .field("metadata", &self.metadata)
            .finish()
    }
}
