use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowdeckError, Result};

/// A directed reference from one node's output to another node's input.
///
/// This is the only construct that forms edges. It names its source by id,
/// so deleting the source leaves the reference dangling rather than invalid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionRef {
    pub from_node: String,
    pub from_output: String,
}

impl ConnectionRef {
    pub fn new(from_node: impl Into<String>, from_output: impl Into<String>) -> Self {
        Self {
            from_node: from_node.into(),
            from_output: from_output.into(),
        }
    }
}

/// One named input of a node: a direct connection, a (possibly nested) value,
/// or neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl InputDescriptor {
    pub fn connected(name: impl Into<String>, connection: ConnectionRef) -> Self {
        Self {
            name: name.into(),
            connection: Some(connection),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            connection: None,
            value: Some(value),
        }
    }
}

/// A node as it appears in a persisted workflow definition.
///
/// Every top-level field other than `id`, `type` and `inputs` lands in
/// `properties`, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputDescriptor>,
}

impl NodeDescriptor {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            properties: Map::new(),
            inputs: vec![],
        }
    }

    /// Add a direct connection input.
    pub fn with_connection(
        mut self,
        input: impl Into<String>,
        from_node: impl Into<String>,
        from_output: impl Into<String>,
    ) -> Self {
        self.inputs.push(InputDescriptor::connected(
            input,
            ConnectionRef::new(from_node, from_output),
        ));
        self
    }

    /// Add a value input (which may embed connections).
    pub fn with_value(mut self, input: impl Into<String>, value: Value) -> Self {
        self.inputs.push(InputDescriptor::with_value(input, value));
        self
    }

    /// Set a property.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Declarative, persisted description of a node graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
}

impl WorkflowDefinition {
    pub fn new(nodes: Vec<NodeDescriptor>) -> Self {
        Self { nodes }
    }

    pub fn node(&self, id: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load a definition file. `.json` is parsed as JSON, anything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Point-in-time report of which nodes have produced output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub node_outputs: Map<String, Value>,
    /// Name of the definition this instance runs, when the runtime reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    /// Explicit execution trace, oldest first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<Vec<String>>,
}

impl ExecutionSnapshot {
    pub fn from_outputs(node_outputs: Map<String, Value>) -> Self {
        Self {
            node_outputs,
            ..Default::default()
        }
    }

    /// Ids of every node that has produced output, in report order.
    pub fn executed_ids(&self) -> Vec<&str> {
        self.node_outputs.keys().map(|k| k.as_str()).collect()
    }

    /// Order-independent summary of the executed id set.
    pub fn signature(&self) -> String {
        let mut ids = self.executed_ids();
        ids.sort_unstable();
        ids.join("\n")
    }

    /// The most recently executed node.
    ///
    /// Uses the explicit trace when the runtime supplies one; otherwise falls
    /// back to the enumeration order of `node_outputs`, which is only a
    /// heuristic.
    pub fn last_executed(&self) -> Option<&str> {
        match self.execution_order {
            Some(ref trace) if !trace.is_empty() => trace.last().map(|s| s.as_str()),
            _ => self.node_outputs.keys().last().map(|s| s.as_str()),
        }
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs.get(node_id)
    }
}

/// One live workflow instance reported by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveInstance {
    pub request_id: String,
    pub snapshot: ExecutionSnapshot,
}

impl ActiveInstance {
    /// Parse the runtime's `{request_id: snapshot}` object, keeping document order.
    pub fn parse_all(value: Value) -> Result<Vec<ActiveInstance>> {
        let map = match value {
            Value::Object(map) => map,
            Value::Null => return Ok(vec![]),
            other => {
                return Err(FlowdeckError::Transport(format!(
                    "expected an object of active instances, got {}",
                    type_name(&other)
                )))
            }
        };

        map.into_iter()
            .map(|(request_id, raw)| {
                let snapshot: ExecutionSnapshot = serde_json::from_value(raw)?;
                Ok(ActiveInstance {
                    request_id,
                    snapshot,
                })
            })
            .collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Summary row from the runtime's run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub workflow_name: String,
    /// Epoch seconds.
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Full record of one finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRun {
    #[serde(default)]
    pub id: Option<String>,
    pub workflow_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub final_state: ExecutionSnapshot,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl HistoricalRun {
    /// The runtime records `FAILED` for runs that raised.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
            || self
                .status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("failed"))
    }
}

/// A gate awaiting operator approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    /// The gate node.
    pub node_id: String,
    /// What the gate is holding back (the gate's reported output).
    pub tool_call: Value,
}

/// Acknowledgement body returned by mutating runtime calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    #[serde(default)]
    pub message: String,
}

/// Lifecycle state of a reconciler session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Polling,
    GateActive,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Polling => write!(f, "polling"),
            Self::GateActive => write!(f, "gate_active"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What a session is watching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ViewMode {
    Live,
    Historical { run_id: String },
}

/// Change notifications published by a reconciler session.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Session moved between lifecycle states.
    StateChanged { from: SessionState, to: SessionState },
    /// A definition was (re)built into the displayed graph.
    DefinitionLoaded {
        name: String,
        nodes: usize,
        edges: usize,
        diagnostics: usize,
    },
    /// Node statuses were re-applied.
    StatusesChanged {
        request_id: Option<String>,
        executed: Vec<String>,
    },
    /// A gate is waiting for the operator.
    ApprovalRequested { request: ApprovalRequest },
    /// The operator resolved a gate.
    ApprovalResolved { request_id: String, approved: bool },
    /// The runtime moved past a gate without an operator response.
    ApprovalCleared { request_id: String },
    /// A poll failed; the next tick retries.
    ConnectionDegraded { error: String },
    /// A poll succeeded after one or more failures.
    ConnectionRestored,
}
