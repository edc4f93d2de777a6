use serde_json::Value;
use tracing::{debug, warn};

use flowdeck_core::error::{DanglingReason, FlowdeckError, Result};
use flowdeck_core::types::ConnectionRef;

use crate::edge::GraphEdge;
use crate::layout::Layout;
use crate::node::{ExecutionStatus, GraphNode};
use crate::registry::NodeTypeRegistry;

/// The editor's in-memory graph.
///
/// Nodes keep declaration order. Input wiring on each node is authoritative;
/// [`Graph::edges`] derives the edge set from it on demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: Vec<GraphNode>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut GraphNode> {
        self.nodes.iter_mut()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub(crate) fn push(&mut self, node: GraphNode) {
        self.nodes.push(node);
    }

    /// All edges, in node / slot / link order.
    pub fn edges(&self) -> Vec<GraphEdge> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.inputs.iter().flat_map(move |slot| {
                    slot.links.iter().map(move |link| {
                        GraphEdge::new(&link.from_node, &link.from_output, &node.id, &slot.name)
                    })
                })
            })
            .collect()
    }

    /// Add an unwired node of a registered type.
    pub fn add_node(
        &mut self,
        registry: &NodeTypeRegistry,
        id: &str,
        node_type: &str,
    ) -> Result<&mut GraphNode> {
        if self.contains(id) {
            return Err(FlowdeckError::DuplicateNodeId(id.to_string()));
        }
        let spec = registry
            .get(node_type)
            .ok_or_else(|| FlowdeckError::UnknownNodeType {
                node_id: id.to_string(),
                node_type: node_type.to_string(),
            })?;

        let node = GraphNode::from_spec(id, registry.namespaced(node_type), spec);
        debug!(node_id = %id, node_type = %node.node_type, "Node added");
        self.nodes.push(node);
        let idx = self.nodes.len() - 1;
        Ok(&mut self.nodes[idx])
    }

    /// Remove a node and every link that referenced it.
    ///
    /// Each severed link comes back as a `DanglingEdge` diagnostic so the
    /// caller can show what the removal broke.
    pub fn remove_node(&mut self, id: &str) -> Result<Vec<FlowdeckError>> {
        let idx = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| FlowdeckError::NodeNotFound(id.to_string()))?;
        self.nodes.remove(idx);

        let mut severed = Vec::new();
        for node in &mut self.nodes {
            for slot in &mut node.inputs {
                slot.links.retain(|link| {
                    if link.from_node != id {
                        return true;
                    }
                    severed.push(FlowdeckError::DanglingEdge {
                        target_node: node.id.clone(),
                        target_input: slot.name.clone(),
                        from_node: link.from_node.clone(),
                        from_output: link.from_output.clone(),
                        reason: DanglingReason::MissingNode,
                    });
                    false
                });
            }
        }

        for diag in &severed {
            warn!(error = %diag, "Edge severed by node removal");
        }
        Ok(severed)
    }

    /// Wire `from_node.from_output` into `to_node.to_input`.
    ///
    /// Returns `false` when the exact link already exists.
    pub fn connect(
        &mut self,
        from_node: &str,
        from_output: &str,
        to_node: &str,
        to_input: &str,
    ) -> Result<bool> {
        let source = self
            .node(from_node)
            .ok_or_else(|| FlowdeckError::NodeNotFound(from_node.to_string()))?;
        if !source.has_output(from_output) {
            return Err(FlowdeckError::SlotNotFound {
                node_id: from_node.to_string(),
                slot: from_output.to_string(),
            });
        }

        let target = self
            .node_mut(to_node)
            .ok_or_else(|| FlowdeckError::NodeNotFound(to_node.to_string()))?;
        let slot = target
            .input_mut(to_input)
            .ok_or_else(|| FlowdeckError::SlotNotFound {
                node_id: to_node.to_string(),
                slot: to_input.to_string(),
            })?;
        Ok(slot.link(ConnectionRef::new(from_node, from_output)))
    }

    /// Remove one link. Returns whether anything was removed.
    pub fn disconnect(
        &mut self,
        from_node: &str,
        from_output: &str,
        to_node: &str,
        to_input: &str,
    ) -> bool {
        let Some(slot) = self.node_mut(to_node).and_then(|n| n.input_mut(to_input)) else {
            return false;
        };
        let before = slot.links.len();
        slot.links
            .retain(|l| !(l.from_node == from_node && l.from_output == from_output));
        slot.links.len() != before
    }

    /// Set an authored property. Keys starting with `_` are kept in memory but
    /// never serialized.
    pub fn set_property(&mut self, id: &str, key: &str, value: Value) -> Result<()> {
        let node = self
            .node_mut(id)
            .ok_or_else(|| FlowdeckError::NodeNotFound(id.to_string()))?;
        node.properties.insert(key.to_string(), value);
        Ok(())
    }

    /// Set a node's execution status and last reported output.
    pub fn annotate(
        &mut self,
        id: &str,
        status: ExecutionStatus,
        output: Option<Value>,
    ) -> Result<()> {
        let node = self
            .node_mut(id)
            .ok_or_else(|| FlowdeckError::NodeNotFound(id.to_string()))?;
        node.set_status(status, output);
        Ok(())
    }

    /// Return every node to the default status and drop reported outputs.
    pub fn reset_statuses(&mut self) {
        for node in &mut self.nodes {
            node.set_status(ExecutionStatus::Default, None);
        }
    }

    pub fn apply_layout(&mut self, layout: &Layout) {
        for node in &mut self.nodes {
            if let Some(pos) = layout.position(&node.id) {
                node.position = Some(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> (NodeTypeRegistry, Graph) {
        let registry = NodeTypeRegistry::with_builtins();
        let mut graph = Graph::new();
        graph.add_node(&registry, "in", "InputNode").unwrap();
        graph.add_node(&registry, "llm", "SimpleLLMNode").unwrap();
        graph.add_node(&registry, "out", "OutputNode").unwrap();
        graph.connect("in", "user_text", "llm", "user_text").unwrap();
        graph.connect("llm", "response", "out", "final_output").unwrap();
        (registry, graph)
    }

    #[test]
    fn test_edges_projection() {
        let (_, graph) = chain();
        let edges = graph.edges();
        assert_eq!(
            edges,
            vec![
                GraphEdge::new("in", "user_text", "llm", "user_text"),
                GraphEdge::new("llm", "response", "out", "final_output"),
            ]
        );
        assert_eq!(graph.node("llm").unwrap().node_type, "agent/SimpleLLMNode");
    }

    #[test]
    fn test_add_node_rejects_duplicates_and_unknown_types() {
        let (registry, mut graph) = chain();
        assert!(matches!(
            graph.add_node(&registry, "in", "InputNode"),
            Err(FlowdeckError::DuplicateNodeId(_))
        ));
        assert!(matches!(
            graph.add_node(&registry, "x", "WarpDriveNode"),
            Err(FlowdeckError::UnknownNodeType { .. })
        ));
    }

    #[test]
    fn test_connect_validates_slots() {
        let (_, mut graph) = chain();
        assert!(matches!(
            graph.connect("in", "nope", "llm", "messages"),
            Err(FlowdeckError::SlotNotFound { .. })
        ));
        assert!(matches!(
            graph.connect("in", "user_text", "llm", "nope"),
            Err(FlowdeckError::SlotNotFound { .. })
        ));
        assert!(matches!(
            graph.connect("ghost", "x", "llm", "messages"),
            Err(FlowdeckError::NodeNotFound(_))
        ));
        assert!(!graph.connect("in", "user_text", "llm", "user_text").unwrap());
    }

    #[test]
    fn test_disconnect() {
        let (_, mut graph) = chain();
        assert!(graph.disconnect("in", "user_text", "llm", "user_text"));
        assert!(!graph.disconnect("in", "user_text", "llm", "user_text"));
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_remove_node_reports_severed_edges() {
        let (_, mut graph) = chain();
        let severed = graph.remove_node("llm").unwrap();
        assert_eq!(severed.len(), 1);
        assert!(matches!(
            &severed[0],
            FlowdeckError::DanglingEdge { target_node, reason: DanglingReason::MissingNode, .. }
                if target_node == "out"
        ));
        assert!(graph.edges().is_empty());
        assert_eq!(graph.ids(), vec!["in", "out"]);
        assert!(graph.remove_node("llm").is_err());
    }

    #[test]
    fn test_annotate_and_reset() {
        let (_, mut graph) = chain();
        graph
            .annotate("in", ExecutionStatus::Executed, Some(json!("hi")))
            .unwrap();
        assert_eq!(graph.node("in").unwrap().status, ExecutionStatus::Executed);
        assert!(graph.annotate("ghost", ExecutionStatus::Gated, None).is_err());

        graph.reset_statuses();
        let node = graph.node("in").unwrap();
        assert_eq!(node.status, ExecutionStatus::Default);
        assert!(node.last_output().is_none());
    }

    #[test]
    fn test_set_property() {
        let (_, mut graph) = chain();
        graph.set_property("llm", "model_tier", json!("fast")).unwrap();
        assert_eq!(
            graph.node("llm").unwrap().property("model_tier"),
            Some(&json!("fast"))
        );
    }
}
