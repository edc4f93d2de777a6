use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use flowdeck_core::config::{AppConfig, NodeTypeConfig};

/// Namespace prefix applied to node types inside a built graph.
pub const DEFAULT_NAMESPACE: &str = "agent/";

/// A named, typed port on a node type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    pub value_type: String,
}

impl SlotSpec {
    pub fn new(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: value_type.into(),
        }
    }
}

/// Declared shape of a node type: its ports and default properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeSpec {
    /// Bare type name, as written in definitions (e.g. `GateNode`).
    pub name: String,
    pub title: String,
    pub inputs: Vec<SlotSpec>,
    pub outputs: Vec<SlotSpec>,
    pub defaults: Map<String, Value>,
}

impl NodeTypeSpec {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            inputs: vec![],
            outputs: vec![],
            defaults: Map::new(),
        }
    }

    pub fn with_input(mut self, name: &str, value_type: &str) -> Self {
        self.inputs.push(SlotSpec::new(name, value_type));
        self
    }

    pub fn with_output(mut self, name: &str, value_type: &str) -> Self {
        self.outputs.push(SlotSpec::new(name, value_type));
        self
    }

    pub fn with_default(mut self, key: &str, value: Value) -> Self {
        self.defaults.insert(key.to_string(), value);
        self
    }

    pub fn input(&self, name: &str) -> Option<&SlotSpec> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|s| s.name == name)
    }
}

impl From<&NodeTypeConfig> for NodeTypeSpec {
    fn from(config: &NodeTypeConfig) -> Self {
        Self {
            name: config.name.clone(),
            title: config.title.clone().unwrap_or_else(|| config.name.clone()),
            inputs: config
                .inputs
                .iter()
                .map(|s| SlotSpec::new(&s.name, &s.value_type))
                .collect(),
            outputs: config
                .outputs
                .iter()
                .map(|s| SlotSpec::new(&s.name, &s.value_type))
                .collect(),
            defaults: config.defaults.clone(),
        }
    }
}

/// Registry of known node types.
///
/// Lookups accept both the bare name and the namespaced form, so callers can
/// pass either a definition's `type` or a graph node's type.
pub struct NodeTypeRegistry {
    types: HashMap<String, NodeTypeSpec>,
    namespace: String,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            types: HashMap::new(),
            namespace: namespace.into(),
        }
    }

    /// Register a node type, replacing any previous type of the same name.
    pub fn register(&mut self, spec: NodeTypeSpec) {
        self.types.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeTypeSpec> {
        self.types.get(self.strip_namespace(node_type))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.get(node_type).is_some()
    }

    /// Registered bare type names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn namespaced(&self, node_type: &str) -> String {
        format!("{}{}", self.namespace, self.strip_namespace(node_type))
    }

    pub fn strip_namespace<'a>(&self, node_type: &'a str) -> &'a str {
        node_type
            .strip_prefix(self.namespace.as_str())
            .unwrap_or(node_type)
    }

    /// Builtins plus every `[[node_types]]` entry, under the configured namespace.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::builtins_in(&config.editor.type_namespace);
        for nt in &config.node_types {
            registry.register(NodeTypeSpec::from(nt));
        }
        registry
    }

    /// Create a registry with all built-in node types registered.
    pub fn with_builtins() -> Self {
        Self::builtins_in(DEFAULT_NAMESPACE)
    }

    fn builtins_in(namespace: &str) -> Self {
        let mut registry = Self::with_namespace(namespace);
        for spec in builtin_types() {
            registry.register(spec);
        }
        registry
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_types() -> Vec<NodeTypeSpec> {
    vec![
        NodeTypeSpec::new("InputNode", "Input")
            .with_output("user_text", "string")
            .with_output("tools_dict", "object")
            .with_output("tool_result", "object")
            .with_output("consul_http_addr", "string"),
        NodeTypeSpec::new("ConsulServiceDiscoveryNode", "Service Discovery")
            .with_input("consul_http_addr", "string")
            .with_output("available_services", "object"),
        NodeTypeSpec::new("SystemPromptNode", "System Prompt")
            .with_input("tools", "object")
            .with_input("available_services", "object")
            .with_output("system_prompt", "string"),
        NodeTypeSpec::new("ScreenshotNode", "Screenshot")
            .with_input("tools", "object")
            .with_output("screenshot_base64", "string"),
        NodeTypeSpec::new("PromptBuilderNode", "Prompt Builder")
            .with_input("system_prompt", "string")
            .with_input("user_text", "string")
            .with_input("screenshot", "string")
            .with_input("tool_result", "object")
            .with_output("messages", "array"),
        NodeTypeSpec::new("SimpleLLMNode", "Simple LLM")
            .with_input("messages", "array")
            .with_input("user_text", "string")
            .with_output("response", "string")
            .with_default("model_tier", json!("balanced"))
            .with_default("system_prompt", json!("You are a helpful assistant.")),
        NodeTypeSpec::new("VisionLLMNode", "Vision LLM")
            .with_input("messages", "array")
            .with_output("response_text", "string"),
        NodeTypeSpec::new("ToolParserNode", "Tool Parser")
            .with_input("llm_response", "string")
            .with_output("tool_call_data", "object")
            .with_output("final_response", "string"),
        NodeTypeSpec::new("ConditionalBranchNode", "Branch")
            .with_input("input_value", "object")
            .with_output("output_true", "object")
            .with_output("output_false", "object")
            .with_default("check_if_tool_is", json!("")),
        NodeTypeSpec::new("GateNode", "Gate")
            .with_input("input_value", "object")
            .with_output("output", "object"),
        NodeTypeSpec::new("ExpertRouterNode", "Expert Router")
            .with_input("expert_name", "string")
            .with_input("query", "string")
            .with_output("expert_response", "string"),
        NodeTypeSpec::new("ToolExecutorNode", "Tool Executor")
            .with_input("tool_call_data", "object")
            .with_output("tool_result", "object"),
        NodeTypeSpec::new("MergeNode", "Merge")
            .with_input("in1", "object")
            .with_input("in2", "object")
            .with_output("merged_output", "object"),
        NodeTypeSpec::new("OutputNode", "Output").with_input("final_output", "object"),
    ]
}
