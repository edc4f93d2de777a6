use std::collections::BTreeSet;

use tracing::{debug, warn};

use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::types::{InputDescriptor, NodeDescriptor, WorkflowDefinition};

use crate::builder::GraphBuilder;
use crate::edge::GraphEdge;
use crate::graph::Graph;
use crate::registry::NodeTypeRegistry;

/// Write a graph back out as a workflow definition.
///
/// This is the inverse of [`GraphBuilder::build`] for definitions that use
/// direct connections only. It is lossy in a few documented ways:
/// - nested `value` wiring comes back as one direct `connection` per edge,
///   repeating the input name when a slot has several sources;
/// - literal values on unconnected inputs are dropped;
/// - internal (`_`-prefixed) properties, type defaults and positions are
///   not persisted.
pub fn serialize(graph: &Graph) -> WorkflowDefinition {
    let nodes = graph
        .nodes()
        .iter()
        .map(|node| {
            let mut desc = NodeDescriptor::new(&node.id, node.bare_type());
            for (key, value) in node.persisted_properties() {
                desc.properties.insert(key.clone(), value.clone());
            }
            for slot in &node.inputs {
                for link in &slot.links {
                    desc.inputs
                        .push(InputDescriptor::connected(&slot.name, link.clone()));
                }
            }
            desc
        })
        .collect();

    let definition = WorkflowDefinition::new(nodes);
    debug!(nodes = definition.nodes.len(), "Graph serialized");
    definition
}

/// Check that serializing and rebuilding `graph` keeps its node ids and edges.
///
/// Callers treat a mismatch as a warning, not a reason to refuse a save.
pub fn verify_round_trip(graph: &Graph, registry: &NodeTypeRegistry) -> Result<()> {
    let definition = serialize(graph);
    let rebuilt = GraphBuilder::new(registry).build(&definition).graph;

    let before: BTreeSet<&str> = graph.ids().into_iter().collect();
    let after: BTreeSet<&str> = rebuilt.ids().into_iter().collect();
    let mut problems = Vec::new();
    for id in before.difference(&after) {
        problems.push(format!("node '{}' lost", id));
    }
    for id in after.difference(&before) {
        problems.push(format!("node '{}' appeared", id));
    }

    let edges_before: BTreeSet<GraphEdge> = graph.edges().into_iter().collect();
    let edges_after: BTreeSet<GraphEdge> = rebuilt.edges().into_iter().collect();
    for edge in edges_before.difference(&edges_after) {
        problems.push(format!("edge {} lost", edge));
    }
    for edge in edges_after.difference(&edges_before) {
        problems.push(format!("edge {} appeared", edge));
    }

    if problems.is_empty() {
        return Ok(());
    }
    let message = problems.join("; ");
    warn!(mismatch = %message, "Round-trip verification failed");
    Err(FlowdeckError::SerializationMismatch(message))
}
