//! Read-only summaries of an engine: counts per layer and a graph export for
//! visualization tools.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use super::engine::LayerDagEngine;
use super::layer::Layer;
use super::node::ResourceRequirements;
use super::result::ExecutionResult;
use crate::core::errors::Result;

/// Snapshot of the engine's shape and its last run
#[derive(Debug, Clone)]
pub struct DagStatistics {
    pub total_nodes: usize,
    /// Number of distinct layers in use
    pub layer_count: usize,
    pub layer_distribution: BTreeMap<Layer, usize>,
    pub last_execution: Option<ExecutionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualNode {
    pub id: String,
    pub layer: Layer,
    pub dependencies: Vec<String>,
    pub description: Option<String>,
    pub resource_requirements: Option<ResourceRequirements>,
}

/// Edge from a dependency to the node that needs it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualizationData {
    pub nodes: Vec<VisualNode>,
    pub edges: Vec<VisualEdge>,
}

impl VisualizationData {
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Graphviz rendering with one cluster per layer
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph LayeredDag {\n");
        dot.push_str("  graph [rankdir=LR, nodesep=0.5, ranksep=1.0];\n");
        dot.push_str("  node [shape=box, style=rounded, fontname=\"Helvetica\"];\n\n");

        let mut by_layer: BTreeMap<Layer, Vec<&VisualNode>> = BTreeMap::new();
        for node in &self.nodes {
            by_layer.entry(node.layer).or_default().push(node);
        }

        for (layer, nodes) in by_layer {
            let _ = writeln!(dot, "  subgraph cluster_layer_{} {{", layer);
            let _ = writeln!(dot, "    label=\"Layer {}\";", layer);
            for node in nodes {
                let label = match &node.description {
                    Some(description) => format!("{}\\n{}", node.id, escape(description)),
                    None => node.id.clone(),
                };
                let _ = writeln!(dot, "    \"{}\" [label=\"{}\"];", escape(&node.id), label);
            }
            dot.push_str("  }\n");
        }

        dot.push('\n');
        for edge in &self.edges {
            let _ = writeln!(dot, "  \"{}\" -> \"{}\";", escape(&edge.from), escape(&edge.to));
        }
        dot.push_str("}\n");
        dot
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

impl LayerDagEngine {
    pub fn statistics(&self) -> DagStatistics {
        let layer_distribution = self.get_nodes().layer_distribution();
        DagStatistics {
            total_nodes: self.get_nodes().len(),
            layer_count: layer_distribution.len(),
            layer_distribution,
            last_execution: self.last_execution().cloned(),
        }
    }

    /// One entry per node and one edge per declared dependency, registered
    /// or not, in insertion order
    pub fn generate_visualization_data(&self) -> VisualizationData {
        let mut data = VisualizationData::default();
        for node in self.get_nodes().iter() {
            let mut seen = HashSet::new();
            for dep_id in &node.dependencies {
                if seen.insert(dep_id.as_str()) {
                    data.edges.push(VisualEdge {
                        from: dep_id.clone(),
                        to: node.id.clone(),
                    });
                }
            }
            data.nodes.push(VisualNode {
                id: node.id.clone(),
                layer: node.layer,
                dependencies: node.dependencies.clone(),
                description: node.metadata.description.clone(),
                resource_requirements: node.metadata.resource_requirements,
            });
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer_dag::node::Node;
    use serde_json::Value;

    fn engine() -> LayerDagEngine {
        let mut engine = LayerDagEngine::new();
        engine
            .add_node(Node::from_fn("M^1-001", |_| async { Ok(Value::Null) }).with_description("Extract symbols"))
            .unwrap();
        engine
            .add_node(
                Node::from_fn("D^100-001", |_| async { Ok(Value::Null) })
                    .with_dependencies(["M^1-001", "M^1-001"]),
            )
            .unwrap();
        engine
    }

    #[test]
    fn test_statistics_counts_layers() {
        let stats = engine().statistics();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.layer_count, 2);
        assert_eq!(stats.layer_distribution, BTreeMap::from([(1, 1), (100, 1)]));
        assert!(stats.last_execution.is_none());
    }

    #[test]
    fn test_visualization_dedups_edges() {
        let data = engine().generate_visualization_data();
        assert_eq!(data.node_ids(), vec!["M^1-001", "D^100-001"]);
        assert_eq!(
            data.edges,
            vec![VisualEdge {
                from: "M^1-001".to_string(),
                to: "D^100-001".to_string()
            }]
        );
        assert_eq!(data.nodes[0].description.as_deref(), Some("Extract symbols"));
    }

    #[test]
    fn test_dot_has_layer_clusters() {
        let dot = engine().generate_visualization_data().to_dot();
        assert!(dot.starts_with("digraph LayeredDag {"));
        assert!(dot.contains("subgraph cluster_layer_1 {"));
        assert!(dot.contains("subgraph cluster_layer_100 {"));
        assert!(dot.contains("\"M^1-001\" -> \"D^100-001\";"));
    }
}
