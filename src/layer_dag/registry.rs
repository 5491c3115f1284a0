//! Node registry and layering validator.
//!
//! Nodes live in a `DiGraph` whose indices follow insertion order; edges run
//! from dependency to dependent. A dependency referenced before it is
//! registered is parked in `pending` and wired up when it arrives.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use tracing::debug;

use super::layer::{extract_layer, Layer};
use super::node::Node;
use crate::core::errors::{DagError, Result};

/// Authoritative set of nodes for one engine
#[derive(Debug, Default)]
pub struct NodeRegistry {
    graph: DiGraph<Node, ()>,
    indices: HashMap<String, NodeIndex>,
    /// Unregistered dependency id -> dependents waiting on it
    pending: HashMap<String, Vec<NodeIndex>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, deriving its layer from its id.
    ///
    /// The registry is left untouched when an error is returned.
    pub fn insert(&mut self, mut node: Node, check_unregistered_layers: bool) -> Result<()> {
        if self.indices.contains_key(&node.id) {
            return Err(DagError::DuplicateNode(node.id));
        }

        let layer = extract_layer(&node.id);
        if node.layer != layer {
            debug!(
                "Overwriting layer {} of node {} with {}",
                node.layer, node.id, layer
            );
        }
        node.layer = layer;

        self.validate_dependencies(&node, check_unregistered_layers)?;
        self.validate_waiting_dependents(&node)?;

        let node_id = node.id.clone();
        let dependencies = node.dependencies.clone();
        let index = self.graph.add_node(node);
        self.indices.insert(node_id.clone(), index);

        for dep_id in &dependencies {
            match self.indices.get(dep_id) {
                Some(&dep_index) => {
                    self.graph.update_edge(dep_index, index, ());
                }
                None => {
                    let waiting = self.pending.entry(dep_id.clone()).or_default();
                    if !waiting.contains(&index) {
                        waiting.push(index);
                    }
                }
            }
        }

        if let Some(dependents) = self.pending.remove(&node_id) {
            for dependent in dependents {
                self.graph.update_edge(index, dependent, ());
            }
        }

        debug!("Registered node {} in layer {}", node_id, layer);
        Ok(())
    }

    fn validate_dependencies(&self, node: &Node, check_unregistered_layers: bool) -> Result<()> {
        for dep_id in &node.dependencies {
            let dependency_layer = if dep_id == &node.id {
                Some(node.layer)
            } else {
                match self.indices.get(dep_id) {
                    Some(&dep_index) => Some(self.graph[dep_index].layer),
                    None if check_unregistered_layers => Some(extract_layer(dep_id)),
                    None => None,
                }
            };

            if let Some(dependency_layer) = dependency_layer {
                if dependency_layer >= node.layer {
                    return Err(DagError::layering_violation(
                        &node.id,
                        node.layer,
                        dep_id,
                        dependency_layer,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Nodes registered earlier may already name this id as a dependency
    fn validate_waiting_dependents(&self, node: &Node) -> Result<()> {
        let Some(dependents) = self.pending.get(&node.id) else {
            return Ok(());
        };
        for &dependent in dependents {
            let dependent = &self.graph[dependent];
            if node.layer >= dependent.layer {
                return Err(DagError::layering_violation(
                    &dependent.id,
                    dependent.layer,
                    &node.id,
                    node.layer,
                ));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.indices.get(id).map(|&index| &self.graph[index])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.indices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        self.graph.node_indices().map(move |index| &self.graph[index])
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter().map(|node| node.id.as_str())
    }

    /// Nodes of one layer, in insertion order
    pub fn nodes_in_layer(&self, layer: Layer) -> Vec<&Node> {
        self.iter().filter(|node| node.layer == layer).collect()
    }

    /// Node count per layer
    pub fn layer_distribution(&self) -> BTreeMap<Layer, usize> {
        let mut distribution = BTreeMap::new();
        for node in self.iter() {
            *distribution.entry(node.layer).or_insert(0) += 1;
        }
        distribution
    }

    /// `(dependent, dependency)` pairs whose dependency was never registered
    pub fn unresolved_dependencies(&self) -> Vec<(&str, &str)> {
        let mut unresolved = Vec::new();
        for node in self.iter() {
            for dep_id in &node.dependencies {
                if !self.indices.contains_key(dep_id) {
                    unresolved.push((node.id.as_str(), dep_id.as_str()));
                }
            }
        }
        unresolved
    }

    pub(crate) fn node_at(&self, index: NodeIndex) -> &Node {
        &self.graph[index]
    }

    /// Kahn's algorithm over registered edges; among ready nodes the earliest
    /// inserted runs first. Returns the order and any nodes left unordered.
    pub(crate) fn topological_order(&self) -> (Vec<NodeIndex>, Vec<NodeIndex>) {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| {
                self.graph
                    .neighbors_directed(index, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(position, _)| Reverse(position))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(position)) = ready.pop() {
            let index = NodeIndex::new(position);
            order.push(index);
            for dependent in self.graph.neighbors_directed(index, Direction::Outgoing) {
                let degree = &mut in_degree[dependent.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(dependent.index()));
                }
            }
        }

        let ordered: HashSet<NodeIndex> = order.iter().copied().collect();
        let leftover = self
            .graph
            .node_indices()
            .filter(|index| !ordered.contains(index))
            .collect();
        (order, leftover)
    }

    /// Group the topological order into waves: a node's wave is one past the
    /// latest wave among its registered dependencies.
    pub(crate) fn waves(&self) -> (Vec<Vec<NodeIndex>>, Vec<NodeIndex>) {
        let (order, leftover) = self.topological_order();
        let mut wave_of: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        let mut waves: Vec<Vec<NodeIndex>> = Vec::new();

        for index in order {
            let wave = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|dep| wave_of.get(&dep).map(|w| w + 1))
                .max()
                .unwrap_or(0);
            wave_of.insert(index, wave);
            while waves.len() <= wave {
                waves.push(Vec::new());
            }
            waves[wave].push(index);
        }

        for wave in &mut waves {
            wave.sort();
        }
        (waves, leftover)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn node(id: &str, deps: &[&str]) -> Node {
        Node::from_fn(id, |_| async { Ok(Value::Null) }).with_dependencies(deps.iter().copied())
    }

    fn ids(registry: &NodeRegistry, indices: &[NodeIndex]) -> Vec<String> {
        indices
            .iter()
            .map(|&i| registry.node_at(i).id.clone())
            .collect()
    }

    #[test]
    fn test_layer_is_derived_from_id() {
        let mut registry = NodeRegistry::new();
        registry
            .insert(node("D^100-001", &[]).with_layer(7), false)
            .unwrap();
        assert_eq!(registry.get("D^100-001").unwrap().layer, 100);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = NodeRegistry::new();
        registry.insert(node("M^1-001", &[]), false).unwrap();
        let err = registry.insert(node("M^1-001", &[]), false).unwrap_err();
        assert!(matches!(err, DagError::DuplicateNode(ref id) if id == "M^1-001"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_layer_dependency_rejected() {
        let mut registry = NodeRegistry::new();
        registry.insert(node("M^1-001", &[]), false).unwrap();
        let err = registry
            .insert(node("M^1-002", &["M^1-001"]), false)
            .unwrap_err();
        match err {
            DagError::LayeringViolation {
                node_id,
                node_layer,
                dependency_id,
                dependency_layer,
            } => {
                assert_eq!(node_id, "M^1-002");
                assert_eq!(node_layer, 1);
                assert_eq!(dependency_id, "M^1-001");
                assert_eq!(dependency_layer, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.contains("M^1-002"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut registry = NodeRegistry::new();
        assert!(registry
            .insert(node("M^1-001", &["M^1-001"]), false)
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_late_dependency_checked_against_waiting_dependents() {
        let mut registry = NodeRegistry::new();
        registry.insert(node("D^100-001", &["X^950-001"]), false).unwrap();
        let err = registry.insert(node("X^950-001", &[]), false).unwrap_err();
        assert!(matches!(
            err,
            DagError::LayeringViolation { ref node_id, ref dependency_id, .. }
                if node_id == "D^100-001" && dependency_id == "X^950-001"
        ));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.unresolved_dependencies(), vec![("D^100-001", "X^950-001")]);
    }

    #[test]
    fn test_unregistered_layers_checked_when_enabled() {
        let mut registry = NodeRegistry::new();
        assert!(registry.insert(node("M^1-003", &["D^100-001"]), false).is_ok());
        assert!(registry.insert(node("M^1-004", &["D^100-001"]), true).is_err());
    }

    #[test]
    fn test_topological_order_ties_follow_insertion() {
        let mut registry = NodeRegistry::new();
        registry.insert(node("X^950-001", &["D^100-002", "M^1-001"]), false).unwrap();
        registry.insert(node("M^1-002", &[]), false).unwrap();
        registry.insert(node("D^100-002", &["M^1-002"]), false).unwrap();
        registry.insert(node("M^1-001", &[]), false).unwrap();
        registry.insert(node("D^100-001", &["M^1-001"]), false).unwrap();

        let (order, leftover) = registry.topological_order();
        assert!(leftover.is_empty());
        assert_eq!(
            ids(&registry, &order),
            vec!["M^1-002", "D^100-002", "M^1-001", "X^950-001", "D^100-001"]
        );
    }

    #[test]
    fn test_waves_group_independent_nodes() {
        let mut registry = NodeRegistry::new();
        registry.insert(node("M^1-001", &[]), false).unwrap();
        registry.insert(node("M^1-002", &[]), false).unwrap();
        registry.insert(node("D^100-001", &["M^1-001", "M^1-002"]), false).unwrap();
        registry.insert(node("D^100-002", &["M^1-001"]), false).unwrap();
        registry.insert(node("X^950-001", &["D^100-001"]), false).unwrap();

        let (waves, leftover) = registry.waves();
        assert!(leftover.is_empty());
        let named: Vec<Vec<String>> = waves.iter().map(|w| ids(&registry, w)).collect();
        assert_eq!(
            named,
            vec![
                vec!["M^1-001".to_string(), "M^1-002".to_string()],
                vec!["D^100-001".to_string(), "D^100-002".to_string()],
                vec!["X^950-001".to_string()],
            ]
        );
    }

    #[test]
    fn test_nodes_in_layer_and_distribution() {
        let mut registry = NodeRegistry::new();
        registry.insert(node("M^1-001", &[]), false).unwrap();
        registry.insert(node("M^1-002", &[]), false).unwrap();
        registry.insert(node("D^100-001", &["M^1-001"]), false).unwrap();

        let layer_one: Vec<&str> = registry
            .nodes_in_layer(1)
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(layer_one, vec!["M^1-001", "M^1-002"]);
        assert_eq!(registry.layer_distribution(), BTreeMap::from([(1, 2), (100, 1)]));
    }
}
