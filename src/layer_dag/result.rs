use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::node::NodeInputs;
use crate::core::errors::DagError;

/// One failed or unreachable node in a run
#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub node_id: String,
    pub error: Arc<DagError>,
    pub timestamp: DateTime<Utc>,
    /// Inputs that had resolved when the node failed
    pub inputs: NodeInputs,
}

impl ExecutionError {
    pub fn new(node_id: impl Into<String>, error: DagError, inputs: NodeInputs) -> Self {
        Self {
            node_id: node_id.into(),
            error: Arc::new(error),
            timestamp: Utc::now(),
            inputs,
        }
    }
}

/// Measured duration of one executed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTiming {
    pub node_id: String,
    pub duration: Duration,
    pub estimated_ms: Option<u64>,
}

/// A node ran longer than its estimate allowed; never counted as an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWarning {
    pub node_id: String,
    pub actual_ms: u64,
    pub estimated_ms: u64,
}

/// Node counts for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_nodes: usize,
    pub executed_nodes: usize,
    pub skipped_nodes: usize,
}

/// Outcome of one `execute()` call
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    /// True iff no node error was recorded
    pub success: bool,
    pub results: HashMap<String, Value>,
    pub errors: Vec<ExecutionError>,
    pub execution_time: Duration,
    /// Nodes in the order they were attempted
    pub execution_order: Vec<String>,
    pub node_timings: Vec<NodeTiming>,
    pub warnings: Vec<PerformanceWarning>,
    pub total_nodes: usize,
}

impl ExecutionResult {
    pub fn execution_time_ms(&self) -> f64 {
        self.execution_time.as_secs_f64() * 1000.0
    }

    pub fn result(&self, node_id: &str) -> Option<&Value> {
        self.results.get(node_id)
    }

    pub fn error_for(&self, node_id: &str) -> Option<&ExecutionError> {
        self.errors.iter().find(|e| e.node_id == node_id)
    }

    pub fn failed_node_ids(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.node_id.as_str()).collect()
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            total_nodes: self.total_nodes,
            executed_nodes: self.results.len(),
            skipped_nodes: self.total_nodes.saturating_sub(self.results.len()),
        }
    }

    /// Serializable view of the run, suitable for an execution log
    pub fn report(&self) -> ExecutionReport {
        let node_outcomes = self
            .execution_order
            .iter()
            .map(|node_id| {
                let failure = self.error_for(node_id);
                NodeOutcome {
                    node_id: node_id.clone(),
                    success: self.results.contains_key(node_id),
                    error_kind: failure.map(|e| e.error.category().to_string()),
                    error: failure.map(|e| e.error.to_string()),
                    duration_ms: self
                        .node_timings
                        .iter()
                        .find(|t| &t.node_id == node_id)
                        .map(|t| t.duration.as_millis() as u64),
                }
            })
            .collect();

        let error = if self.errors.is_empty() {
            None
        } else {
            Some(
                self.errors
                    .iter()
                    .map(|e| e.error.to_string())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        };

        ExecutionReport {
            run_id: self.run_id,
            overall_success: self.success,
            execution_time_ms: self.execution_time.as_millis() as u64,
            summary: self.summary(),
            node_outcomes,
            warnings: self.warnings.clone(),
            error,
        }
    }
}

/// Outcome of one node in an [`ExecutionReport`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub node_id: String,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub overall_success: bool,
    pub execution_time_ms: u64,
    pub summary: ExecutionSummary,
    pub node_outcomes: Vec<NodeOutcome>,
    pub warnings: Vec<PerformanceWarning>,
    /// All error messages joined, for a quick look at why the run failed
    pub error: Option<String>,
}
