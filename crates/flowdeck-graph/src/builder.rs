use std::collections::HashSet;

use tracing::{debug, info, warn};

use flowdeck_core::error::{DanglingReason, FlowdeckError, Result};
use flowdeck_core::types::{ConnectionRef, NodeDescriptor, WorkflowDefinition};

use crate::graph::Graph;
use crate::node::GraphNode;
use crate::registry::NodeTypeRegistry;
use crate::resolver::find_connections;

/// Descriptor keys that are structure, not properties.
const RESERVED_KEYS: &[&str] = &["id", "type", "inputs", "outputs"];

/// A graph plus every structural problem found while building it.
#[derive(Debug)]
pub struct BuildReport {
    pub graph: Graph,
    pub diagnostics: Vec<FlowdeckError>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Diagnostics attached to one node.
    pub fn diagnostics_for(&self, node_id: &str) -> Vec<&FlowdeckError> {
        self.diagnostics
            .iter()
            .filter(|d| d.node_id() == Some(node_id))
            .collect()
    }
}

/// Turns a workflow definition into an editor graph.
///
/// Problems never abort a build. Unknown types and duplicate ids skip the
/// node; unresolvable connections drop the edge. All of them are collected
/// in the report.
pub struct GraphBuilder<'r> {
    registry: &'r NodeTypeRegistry,
}

impl<'r> GraphBuilder<'r> {
    pub fn new(registry: &'r NodeTypeRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, definition: &WorkflowDefinition) -> BuildReport {
        let mut graph = Graph::new();
        let mut diagnostics = Vec::new();

        // Pass 1: nodes. Wiring waits until every node exists so forward
        // references resolve.
        let mut accepted: Vec<&NodeDescriptor> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for desc in &definition.nodes {
            if !seen.insert(desc.id.as_str()) {
                diagnostics.push(FlowdeckError::DuplicateNodeId(desc.id.clone()));
                continue;
            }
            let Some(spec) = self.registry.get(&desc.node_type) else {
                diagnostics.push(FlowdeckError::UnknownNodeType {
                    node_id: desc.id.clone(),
                    node_type: desc.node_type.clone(),
                });
                continue;
            };

            let mut node =
                GraphNode::from_spec(&desc.id, self.registry.namespaced(&desc.node_type), spec);
            for (key, value) in &desc.properties {
                if RESERVED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                node.properties.insert(key.clone(), value.clone());
            }
            graph.push(node);
            accepted.push(desc);
        }

        // Pass 2: wiring.
        for desc in accepted {
            for input in &desc.inputs {
                let mut refs: Vec<ConnectionRef> = Vec::new();
                if let Some(ref conn) = input.connection {
                    refs.push(conn.clone());
                }
                if let Some(ref value) = input.value {
                    refs.extend(find_connections(value));
                }
                for conn in refs {
                    if let Err(diag) = self.wire(&mut graph, &desc.id, &input.name, conn) {
                        diagnostics.push(diag);
                    }
                }
            }
        }

        for diag in &diagnostics {
            warn!(error = %diag, "Build diagnostic");
        }
        info!(
            nodes = graph.len(),
            edges = graph.edges().len(),
            diagnostics = diagnostics.len(),
            "Graph built"
        );

        BuildReport { graph, diagnostics }
    }

    fn wire(
        &self,
        graph: &mut Graph,
        target: &str,
        input: &str,
        conn: ConnectionRef,
    ) -> Result<()> {
        let dangling = |reason| FlowdeckError::DanglingEdge {
            target_node: target.to_string(),
            target_input: input.to_string(),
            from_node: conn.from_node.clone(),
            from_output: conn.from_output.clone(),
            reason,
        };

        match graph.node(&conn.from_node) {
            None => return Err(dangling(DanglingReason::MissingNode)),
            Some(source) if !source.has_output(&conn.from_output) => {
                return Err(dangling(DanglingReason::MissingOutput))
            }
            Some(_) => {}
        }

        let slot = graph
            .node_mut(target)
            .and_then(|n| n.input_mut(input))
            .ok_or_else(|| dangling(DanglingReason::MissingInputSlot))?;

        if !slot.link(conn.clone()) {
            debug!(
                from_node = %conn.from_node,
                from_output = %conn.from_output,
                target_node = %target,
                target_input = %input,
                "Duplicate connection ignored"
            );
        }
        Ok(())
    }
}
