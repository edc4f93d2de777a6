use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use flowdeck_core::types::ConnectionRef;

use crate::registry::{NodeTypeSpec, SlotSpec};

/// Property key holding the output last reported for a node.
pub const LAST_OUTPUT_KEY: &str = "_last_output";

/// Keys starting with this marker are derived/cache data and never persisted.
pub const INTERNAL_PREFIX: char = '_';

pub fn is_internal_key(key: &str) -> bool {
    key.starts_with(INTERNAL_PREFIX)
}

/// Display status of a node against the monitored instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Default,
    Executed,
    Gated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// An input port and its incoming wiring.
///
/// A slot may hold several connections when an authored `value` referenced
/// more than one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    pub value_type: String,
    pub links: Vec<ConnectionRef>,
}

impl InputSlot {
    fn from_spec(spec: &SlotSpec) -> Self {
        Self {
            name: spec.name.clone(),
            value_type: spec.value_type.clone(),
            links: vec![],
        }
    }

    /// Add a link unless an identical one is already present.
    pub fn link(&mut self, conn: ConnectionRef) -> bool {
        if self.links.contains(&conn) {
            return false;
        }
        self.links.push(conn);
        true
    }
}

/// A node in the editor graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    /// Namespaced type, e.g. `agent/GateNode`.
    pub node_type: String,
    pub title: String,
    pub inputs: Vec<InputSlot>,
    pub outputs: Vec<SlotSpec>,
    /// Authored properties plus internal (`_`-prefixed) annotations.
    pub properties: Map<String, Value>,
    /// Type defaults; read through [`GraphNode::property`] but never serialized.
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub status: ExecutionStatus,
}

impl GraphNode {
    /// Create an unwired node with the slots and defaults of `spec`.
    pub fn from_spec(
        id: impl Into<String>,
        node_type: impl Into<String>,
        spec: &NodeTypeSpec,
    ) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            title: spec.title.clone(),
            inputs: spec.inputs.iter().map(InputSlot::from_spec).collect(),
            outputs: spec.outputs.clone(),
            properties: Map::new(),
            defaults: spec.defaults.clone(),
            position: None,
            status: ExecutionStatus::Default,
        }
    }

    /// Type name without its namespace prefix.
    pub fn bare_type(&self) -> &str {
        self.node_type
            .rsplit_once('/')
            .map_or(self.node_type.as_str(), |(_, bare)| bare)
    }

    pub fn input(&self, name: &str) -> Option<&InputSlot> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut InputSlot> {
        self.inputs.iter_mut().find(|s| s.name == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|s| s.name == name)
    }

    /// Effective property: the authored value, else the type default.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).or_else(|| self.defaults.get(key))
    }

    pub fn last_output(&self) -> Option<&Value> {
        self.properties.get(LAST_OUTPUT_KEY)
    }

    /// Authored properties only, in insertion order.
    pub fn persisted_properties(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.properties.iter().filter(|(k, _)| !is_internal_key(k))
    }

    /// Distinct upstream node ids, in wiring order.
    pub fn predecessors(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for link in self.inputs.iter().flat_map(|s| s.links.iter()) {
            if !seen.contains(&link.from_node.as_str()) {
                seen.push(&link.from_node);
            }
        }
        seen
    }

    pub fn set_status(&mut self, status: ExecutionStatus, output: Option<Value>) {
        self.status = status;
        match output {
            Some(v) => {
                self.properties.insert(LAST_OUTPUT_KEY.to_string(), v);
            }
            None => {
                self.properties.remove(LAST_OUTPUT_KEY);
            }
        }
    }
}
