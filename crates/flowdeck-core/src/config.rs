use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowdeckError, Result};

/// Top-level flowdeck configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    /// Node types registered on top of the builtins.
    #[serde(default)]
    pub node_types: Vec<NodeTypeConfig>,
}

/// Where the agent runtime lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent verbatim in the `Authorization` header on mutating calls.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String { "http://localhost:8000".to_string() }
fn default_timeout_secs() -> u64 { 10 }

/// Polling and gate behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Definition shown when nothing is running, and the fallback when a
    /// named definition fails to load.
    #[serde(default = "default_workflow")]
    pub default_workflow: String,
    /// Node type that pauses execution for operator approval.
    #[serde(default = "default_gate_type")]
    pub gate_type: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            default_workflow: default_workflow(),
            gate_type: default_gate_type(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_poll_interval_ms() -> u64 { 2000 }
fn default_workflow() -> String { "default_agent_loop.yaml".to_string() }
fn default_gate_type() -> String { "GateNode".to_string() }
fn default_history_limit() -> usize { 50 }

/// Column/row spacing for the automatic layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_x_spacing")]
    pub x_spacing: f64,
    #[serde(default = "default_y_spacing")]
    pub y_spacing: f64,
    #[serde(default = "default_margin")]
    pub margin: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            x_spacing: default_x_spacing(),
            y_spacing: default_y_spacing(),
            margin: default_margin(),
        }
    }
}

fn default_x_spacing() -> f64 { 250.0 }
fn default_y_spacing() -> f64 { 150.0 }
fn default_margin() -> f64 { 100.0 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Rebuild every serialized graph and fail on any structural drift.
    #[serde(default)]
    pub strict_round_trip: bool,
    /// Prefix applied to node types inside a built graph.
    #[serde(default = "default_type_namespace")]
    pub type_namespace: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            strict_round_trip: false,
            type_namespace: default_type_namespace(),
        }
    }
}

fn default_type_namespace() -> String { "agent/".to_string() }

/// A named, typed port declared by a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub name: String,
    #[serde(default = "default_value_type", rename = "type")]
    pub value_type: String,
}

fn default_value_type() -> String { "object".to_string() }

/// User-declared node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeConfig {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub inputs: Vec<SlotConfig>,
    #[serde(default)]
    pub outputs: Vec<SlotConfig>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowdeckError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| FlowdeckError::Config(e.to_string()))
    }

    /// Load an explicit path, or the first of `./flowdeck.toml` and
    /// `~/.flowdeck/config.toml` that exists, or fall back to defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = PathBuf::from("flowdeck.toml");
        if local.exists() {
            return Self::load(&local);
        }
        if let Some(home) = Self::default_path() {
            if home.exists() {
                return Self::load(&home);
            }
        }
        Ok(Self::default())
    }

    /// `~/.flowdeck/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs_home().map(|h| h.join(".flowdeck").join("config.toml"))
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sync.poll_interval_ms.max(1))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_FLOWDECK_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_FLOWDECK_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_FLOWDECK_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_FLOWDECK_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_FLOWDECK_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.runtime.base_url, "http://localhost:8000");
        assert!(config.runtime.api_key.is_none());
        assert_eq!(config.sync.poll_interval_ms, 2000);
        assert_eq!(config.sync.default_workflow, "default_agent_loop.yaml");
        assert_eq!(config.sync.gate_type, "GateNode");
        assert_eq!(config.sync.history_limit, 50);
        assert_eq!(config.layout, LayoutConfig::default());
        assert_eq!(config.layout.x_spacing, 250.0);
        assert!(!config.editor.strict_round_trip);
        assert_eq!(config.editor.type_namespace, "agent/");
        assert!(config.node_types.is_empty());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let toml_str = r#"
[sync]
poll_interval_ms = 500

[layout]
margin = 20.0
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sync.poll_interval_ms, 500);
        assert_eq!(config.sync.gate_type, "GateNode");
        assert_eq!(config.layout.margin, 20.0);
        assert_eq!(config.layout.y_spacing, 150.0);
    }

    #[test]
    fn test_node_types_section() {
        let toml_str = r#"
[[node_types]]
name = "RerankNode"
title = "Rerank"
inputs = [{ name = "documents", type = "array" }, { name = "query" }]
outputs = [{ name = "ranked", type = "array" }]

[node_types.defaults]
top_k = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let nt = &config.node_types[0];
        assert_eq!(nt.name, "RerankNode");
        assert_eq!(nt.inputs[1].value_type, "object");
        assert_eq!(nt.outputs[0].value_type, "array");
        assert_eq!(nt.defaults["top_k"], serde_json::json!(5));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/flowdeck.toml")).unwrap_err();
        assert!(matches!(err, FlowdeckError::ConfigNotFound(_)));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[sync\npoll_interval_ms = ").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, FlowdeckError::Config(_)));
    }
}
