use thiserror::Error;

/// Why a connection reference could not be turned into an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingReason {
    /// `from_node` names no node in the definition.
    MissingNode,
    /// The source node exists but declares no output with that name.
    MissingOutput,
    /// The target node's type declares no input slot with that name.
    MissingInputSlot,
}

impl std::fmt::Display for DanglingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingNode => write!(f, "source node does not exist"),
            Self::MissingOutput => write!(f, "source output does not exist"),
            Self::MissingInputSlot => write!(f, "target input slot does not exist"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowdeckError {
    // Structural errors (collected, never abort a build)
    #[error("Unknown node type '{node_type}' on node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error(
        "Dangling edge {from_node}.{from_output} -> {target_node}.{target_input}: {reason}"
    )]
    DanglingEdge {
        target_node: String,
        target_input: String,
        from_node: String,
        from_output: String,
        reason: DanglingReason,
    },

    #[error("Cycle detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Serialization mismatch: {0}")]
    SerializationMismatch(String),

    // Editing errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Slot '{slot}' not found on node '{node_id}'")]
    SlotNotFound { node_id: String, slot: String },

    // Runtime / sync errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid workflow name: {0}")]
    InvalidWorkflowName(String),

    #[error("No outstanding approval for request: {0}")]
    NoOutstandingApproval(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Format errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FlowdeckError {
    /// The node a structural diagnostic should be attached to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::UnknownNodeType { node_id, .. } => Some(node_id),
            Self::DuplicateNodeId(id) => Some(id),
            Self::DanglingEdge { target_node, .. } => Some(target_node),
            Self::NodeNotFound(id) => Some(id),
            Self::SlotNotFound { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Structural errors are reported in aggregate and never block editing.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnknownNodeType { .. }
                | Self::DuplicateNodeId(_)
                | Self::DanglingEdge { .. }
                | Self::CycleDetected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FlowdeckError>;
