//! The layered DAG engine.
//!
//! Nodes are registered one at a time, each checked against the layering
//! invariant, then run in dependency order. Each node receives the outputs of
//! its dependencies; a failing node is recorded and the run carries on with
//! everything that does not depend on it.

use petgraph::graph::NodeIndex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::events::{EngineEvent, EngineEventEnvelope, EventSink};
use super::layer::Layer;
use super::node::{Node, NodeInputs};
use super::parallel::execute_waves;
use super::registry::NodeRegistry;
use super::result::{ExecutionError, ExecutionResult, NodeTiming, PerformanceWarning};
use crate::core::config::{EngineConfig, UpstreamFailurePolicy};
use crate::core::errors::{DagError, Result};

/// The main executor for layered DAGs.
pub struct LayerDagEngine {
    registry: NodeRegistry,
    config: EngineConfig,
    last_execution: Option<ExecutionResult>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl Default for LayerDagEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerDagEngine {
    /// Creates an empty engine with the default configuration
    pub fn new() -> Self {
        Self {
            registry: NodeRegistry::new(),
            config: EngineConfig::default(),
            last_execution: None,
            event_sink: None,
        }
    }

    /// Creates an empty engine after validating `config`
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.event_sink = Some(sink);
    }

    /// Register a node.
    ///
    /// The node's layer is taken from its id. Fails with `LayeringViolation`
    /// if a registered dependency is not in a strictly lower layer, and with
    /// `DuplicateNode` if the id is taken.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        let node_id = node.id.clone();
        self.registry
            .insert(node, self.config.check_unregistered_dependency_layers)
            .map_err(|e| {
                warn!("Rejected node {}: {}", node_id, e);
                e
            })
    }

    /// Read-only view of every registered node, in insertion order
    pub fn nodes(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn get_nodes(&self) -> &NodeRegistry {
        self.nodes()
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.registry.get(id)
    }

    pub fn get_nodes_by_layer(&self, layer: Layer) -> Vec<&Node> {
        self.registry.nodes_in_layer(layer)
    }

    /// Result of the most recent `execute()`
    pub fn last_execution(&self) -> Option<&ExecutionResult> {
        self.last_execution.as_ref()
    }

    /// Run every registered node once, in dependency order.
    ///
    /// Node failures never abort the run; they are collected in the returned
    /// result, which is also kept as the last execution.
    #[instrument(skip_all)]
    pub async fn execute(&mut self) -> ExecutionResult {
        let result = {
            let mut state = RunState::new(Uuid::new_v4(), self.event_sink.clone());
            info!(
                "Executing layered DAG run {} with {} nodes (parallel={})",
                state.run_id,
                self.registry.len(),
                self.config.enable_parallel_execution
            );
            for (node_id, dependency_id) in self.registry.unresolved_dependencies() {
                warn!(
                    "Node {} depends on unregistered node {}",
                    node_id, dependency_id
                );
            }
            state.emit(EngineEvent::RunStarted {
                total_nodes: self.registry.len(),
            });

            if self.config.enable_parallel_execution {
                execute_waves(&self.registry, &self.config, &mut state).await;
            } else {
                execute_sequential(&self.registry, &self.config, &mut state).await;
            }

            state.finish(self.registry.len(), &self.config)
        };

        self.last_execution = Some(result.clone());
        result
    }

    /// Run a single node against the outputs of the last execution.
    ///
    /// Fails with `NodeNotFound` for an unknown id. Does not change the
    /// engine's state.
    pub async fn execute_node(&self, id: &str) -> Result<Value> {
        let node = self
            .registry
            .get(id)
            .ok_or_else(|| DagError::NodeNotFound(id.to_string()))?;

        let empty = HashMap::new();
        let results = self
            .last_execution
            .as_ref()
            .map_or(&empty, |last| &last.results);

        let inputs = resolve_inputs(&self.registry, node, results, self.config.upstream_failure)
            .map_err(|(error, _)| error)?;

        match run_node(node, inputs, &self.config).await {
            NodeRun::Completed {
                value, warning, ..
            } => {
                if let Some(warning) = warning {
                    log_performance_warning(&warning);
                }
                Ok(value)
            }
            NodeRun::Failed { error, .. } => Err(error),
        }
    }
}

async fn execute_sequential(registry: &NodeRegistry, config: &EngineConfig, state: &mut RunState) {
    let (order, leftover) = registry.topological_order();
    state.plan(registry, &order);

    for index in order {
        let node = registry.node_at(index);
        match resolve_inputs(registry, node, &state.results, config.upstream_failure) {
            Ok(inputs) => {
                state.node_started(node);
                let run = run_node(node, inputs, config).await;
                state.record(node, run);
            }
            Err((error, inputs)) => state.skip(node, error, inputs),
        }
    }

    state.record_unordered(registry, leftover);
}

/// Collect the outputs a node needs from `results`.
///
/// An unregistered dependency always prevents the run. A registered one
/// without a result does so unless the policy allows partial inputs.
pub(super) fn resolve_inputs(
    registry: &NodeRegistry,
    node: &Node,
    results: &HashMap<String, Value>,
    policy: UpstreamFailurePolicy,
) -> std::result::Result<NodeInputs, (DagError, NodeInputs)> {
    let mut inputs = NodeInputs::new();
    let mut unresolved: Option<&str> = None;

    for dep_id in &node.dependencies {
        if !registry.contains(dep_id) {
            return Err((DagError::missing_dependency(&node.id, dep_id), inputs));
        }
        match results.get(dep_id) {
            Some(value) => inputs.insert(dep_id.clone(), value.clone()),
            None => match policy {
                UpstreamFailurePolicy::Skip => {
                    unresolved.get_or_insert(dep_id.as_str());
                }
                UpstreamFailurePolicy::RunWithAvailableInputs => {
                    warn!(
                        "Dependency result not found: {} (required by {}), running with available inputs",
                        dep_id, node.id
                    );
                }
            },
        }
    }

    match unresolved {
        Some(dep_id) => Err((DagError::upstream_failed(&node.id, dep_id), inputs)),
        None => Ok(inputs),
    }
}

/// Outcome of running one node's action
pub(super) enum NodeRun {
    Completed {
        value: Value,
        duration: Duration,
        warning: Option<PerformanceWarning>,
    },
    Failed {
        error: DagError,
        inputs: NodeInputs,
        duration: Duration,
    },
}

pub(super) async fn run_node(node: &Node, inputs: NodeInputs, config: &EngineConfig) -> NodeRun {
    debug!(
        "Executing node {} (layer {}) with {} inputs",
        node.id,
        node.layer,
        inputs.len()
    );

    let start = Instant::now();
    let outcome = node.action.execute(inputs.clone()).await;
    let duration = start.elapsed();

    match outcome {
        Ok(value) => NodeRun::Completed {
            value,
            duration,
            warning: check_performance(node, duration, config),
        },
        Err(e) => {
            error!("Node {} failed: {:#}", node.id, e);
            NodeRun::Failed {
                error: DagError::node_execution(&node.id, e),
                inputs,
                duration,
            }
        }
    }
}

fn check_performance(node: &Node, duration: Duration, config: &EngineConfig) -> Option<PerformanceWarning> {
    let estimated_ms = node
        .metadata
        .estimated_execution_ms
        .or(config.default_estimated_execution_ms)?;
    let actual = duration.as_secs_f64() * 1000.0;
    if actual > estimated_ms as f64 * config.performance_warning_factor {
        Some(PerformanceWarning {
            node_id: node.id.clone(),
            actual_ms: duration.as_millis() as u64,
            estimated_ms,
        })
    } else {
        None
    }
}

fn log_performance_warning(warning: &PerformanceWarning) {
    warn!(
        "Performance warning: {} ({}ms > {}ms)",
        warning.node_id, warning.actual_ms, warning.estimated_ms
    );
}

/// Accumulates the outcome of one run
pub(super) struct RunState {
    pub(super) run_id: Uuid,
    pub(super) results: HashMap<String, Value>,
    errors: Vec<ExecutionError>,
    execution_order: Vec<String>,
    node_timings: Vec<NodeTiming>,
    warnings: Vec<PerformanceWarning>,
    event_sink: Option<Arc<dyn EventSink>>,
    started: Instant,
    /// Position of each node in the topological order
    rank: HashMap<String, usize>,
}

impl RunState {
    fn new(run_id: Uuid, event_sink: Option<Arc<dyn EventSink>>) -> Self {
        Self {
            run_id,
            results: HashMap::new(),
            errors: Vec::new(),
            execution_order: Vec::new(),
            node_timings: Vec::new(),
            warnings: Vec::new(),
            event_sink,
            started: Instant::now(),
            rank: HashMap::new(),
        }
    }

    /// Remember the topological order so outcomes can be reported in it,
    /// whatever order they were recorded in
    pub(super) fn plan(&mut self, registry: &NodeRegistry, order: &[NodeIndex]) {
        self.rank = order
            .iter()
            .enumerate()
            .map(|(position, &index)| (registry.node_at(index).id.clone(), position))
            .collect();
    }

    pub(super) fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.event_sink {
            sink.emit(&EngineEventEnvelope::new(self.run_id, event));
        }
    }

    pub(super) fn node_started(&mut self, node: &Node) {
        self.execution_order.push(node.id.clone());
        self.emit(EngineEvent::NodeStarted {
            node_id: node.id.clone(),
            layer: node.layer,
        });
    }

    pub(super) fn record(&mut self, node: &Node, run: NodeRun) {
        match run {
            NodeRun::Completed {
                value,
                duration,
                warning,
            } => {
                debug!("Node {} completed in {:?}", node.id, duration);
                self.timing(node, duration);
                self.emit(EngineEvent::NodeCompleted {
                    node_id: node.id.clone(),
                    success: true,
                    duration_ms: duration.as_millis() as u64,
                });
                if let Some(warning) = warning {
                    log_performance_warning(&warning);
                    self.emit(EngineEvent::PerformanceWarning {
                        node_id: warning.node_id.clone(),
                        actual_ms: warning.actual_ms,
                        estimated_ms: warning.estimated_ms,
                    });
                    self.warnings.push(warning);
                }
                self.results.insert(node.id.clone(), value);
            }
            NodeRun::Failed {
                error,
                inputs,
                duration,
            } => {
                self.timing(node, duration);
                self.emit(EngineEvent::NodeCompleted {
                    node_id: node.id.clone(),
                    success: false,
                    duration_ms: duration.as_millis() as u64,
                });
                self.errors.push(ExecutionError::new(&node.id, error, inputs));
            }
        }
    }

    /// The node could not be given its inputs and was not run
    pub(super) fn skip(&mut self, node: &Node, error: DagError, inputs: NodeInputs) {
        warn!("Skipping node {}: {}", node.id, error);
        self.emit(EngineEvent::NodeSkipped {
            node_id: node.id.clone(),
            reason: error.to_string(),
        });
        self.errors.push(ExecutionError::new(&node.id, error, inputs));
    }

    /// Nodes the topological sort could not place.
    ///
    /// Edges only run from lower to strictly higher layers, so `leftover` is
    /// always empty for a registry built through `insert`.
    pub(super) fn record_unordered(&mut self, registry: &NodeRegistry, leftover: Vec<NodeIndex>) {
        debug_assert!(leftover.is_empty(), "layered graph has a cycle");
        for index in leftover {
            let node = registry.node_at(index);
            let error = DagError::CycleDetected {
                node_id: node.id.clone(),
            };
            error!("{}", error);
            self.errors
                .push(ExecutionError::new(&node.id, error, NodeInputs::new()));
        }
    }

    fn timing(&mut self, node: &Node, duration: Duration) {
        self.node_timings.push(NodeTiming {
            node_id: node.id.clone(),
            duration,
            estimated_ms: node.metadata.estimated_execution_ms,
        });
    }

    fn finish(mut self, total_nodes: usize, config: &EngineConfig) -> ExecutionResult {
        let execution_time = self.started.elapsed();

        // Stable sorts; unordered nodes keep their place at the end
        let rank = std::mem::take(&mut self.rank);
        let position = |id: &str| rank.get(id).copied().unwrap_or(usize::MAX);
        self.errors.sort_by_key(|e| position(e.node_id.as_str()));
        self.execution_order.sort_by_key(|id| position(id.as_str()));
        self.node_timings.sort_by_key(|t| position(t.node_id.as_str()));
        self.warnings.sort_by_key(|w| position(w.node_id.as_str()));
        let success = self.errors.is_empty();

        info!(
            "Run {} finished in {:?}: {} succeeded, {} failed",
            self.run_id,
            execution_time,
            self.results.len(),
            self.errors.len()
        );
        if let Some(budget_ms) = config.run_time_budget_ms {
            if execution_time > Duration::from_millis(budget_ms) {
                warn!(
                    "Run {} exceeded its time budget ({:?} > {}ms)",
                    self.run_id, execution_time, budget_ms
                );
            }
        }

        self.emit(EngineEvent::RunCompleted {
            success,
            executed_nodes: self.results.len(),
            failed_nodes: self.errors.len(),
            duration_ms: execution_time.as_millis() as u64,
        });

        ExecutionResult {
            run_id: self.run_id,
            success,
            results: self.results,
            errors: self.errors,
            execution_time,
            execution_order: self.execution_order,
            node_timings: self.node_timings,
            warnings: self.warnings,
            total_nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(id: &str, deps: &[&str], value: Value) -> Node {
        Node::from_fn(id, move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
        .with_dependencies(deps.iter().copied())
    }

    #[tokio::test]
    async fn test_resolve_inputs_distinguishes_missing_and_upstream() {
        let mut engine = LayerDagEngine::new();
        engine.add_node(constant("M^1-001", &[], json!(1))).unwrap();
        engine
            .add_node(constant("D^100-001", &["M^1-001", "M^1-999"], json!(2)))
            .unwrap();
        engine
            .add_node(constant("D^100-002", &["M^1-001"], json!(3)))
            .unwrap();

        let node = engine.get_node("D^100-001").unwrap();
        let (err, _) =
            resolve_inputs(&engine.registry, node, &HashMap::new(), UpstreamFailurePolicy::Skip)
                .unwrap_err();
        assert!(matches!(err, DagError::MissingDependency { ref dependency_id, .. } if dependency_id == "M^1-999"));

        let node = engine.get_node("D^100-002").unwrap();
        let (err, _) =
            resolve_inputs(&engine.registry, node, &HashMap::new(), UpstreamFailurePolicy::Skip)
                .unwrap_err();
        assert!(matches!(err, DagError::UpstreamFailed { ref dependency_id, .. } if dependency_id == "M^1-001"));

        let inputs = resolve_inputs(
            &engine.registry,
            node,
            &HashMap::new(),
            UpstreamFailurePolicy::RunWithAvailableInputs,
        )
        .unwrap();
        assert!(inputs.is_empty());
    }

    #[tokio::test]
    async fn test_performance_warning_uses_factor() {
        let config = EngineConfig {
            performance_warning_factor: 2.0,
            ..Default::default()
        };
        let node = constant("M^1-001", &[], json!(null)).with_estimated_execution_ms(10);
        assert!(check_performance(&node, Duration::from_millis(15), &config).is_none());
        let warning = check_performance(&node, Duration::from_millis(25), &config).unwrap();
        assert_eq!(warning.actual_ms, 25);
        assert_eq!(warning.estimated_ms, 10);

        let no_estimate = constant("M^1-002", &[], json!(null));
        assert!(check_performance(&no_estimate, Duration::from_secs(1), &config).is_none());
    }

    #[tokio::test]
    async fn test_last_execution_replaced_each_run() {
        let mut engine = LayerDagEngine::new();
        engine.add_node(constant("M^1-001", &[], json!("a"))).unwrap();
        assert!(engine.last_execution().is_none());

        let first = engine.execute().await;
        let second = engine.execute().await;
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(engine.last_execution().unwrap().run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_forward_references_leave_nothing_unordered() {
        let mut engine = LayerDagEngine::new();
        engine
            .add_node(constant("X^950-001", &["D^100-001", "M^1-001"], json!(3)))
            .unwrap();
        engine
            .add_node(constant("D^100-001", &["M^1-001"], json!(2)))
            .unwrap();
        engine.add_node(constant("M^1-001", &[], json!(1))).unwrap();

        let (order, leftover) = engine.registry.topological_order();
        assert_eq!(order.len(), 3);
        assert!(leftover.is_empty());

        let result = engine.execute().await;
        assert!(result.success);
        assert!(result.errors.iter().all(|e| e.error.category() != "cycle"));
    }

    #[test]
    fn test_with_config_rejects_invalid() {
        let config = EngineConfig {
            max_parallel_nodes: 0,
            ..Default::default()
        };
        assert!(LayerDagEngine::with_config(config).is_err());
    }
}
