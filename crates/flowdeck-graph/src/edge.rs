use serde::{Deserialize, Serialize};

/// A directed wire `(source_node.source_output) -> (target_node.target_input)`.
///
/// Edges are a projection of node input wiring and are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_node: String,
    pub source_output: String,
    pub target_node: String,
    pub target_input: String,
}

impl GraphEdge {
    pub fn new(
        source_node: impl Into<String>,
        source_output: impl Into<String>,
        target_node: impl Into<String>,
        target_input: impl Into<String>,
    ) -> Self {
        Self {
            source_node: source_node.into(),
            source_output: source_output.into(),
            target_node: target_node.into(),
            target_input: target_input.into(),
        }
    }
}

impl std::fmt::Display for GraphEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source_node, self.source_output, self.target_node, self.target_input
        )
    }
}
