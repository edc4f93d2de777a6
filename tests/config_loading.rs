use std::io::Write;

use flowdeck_core::config::AppConfig;
use flowdeck_graph::NodeTypeRegistry;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[runtime]
base_url = "http://runtime.internal:9000/"
api_key = "sk-test-key"
timeout_secs = 3

[sync]
poll_interval_ms = 500
default_workflow = "main_loop.yaml"
gate_type = "ApprovalNode"
history_limit = 10

[layout]
x_spacing = 300.0
y_spacing = 120.0
margin = 40.0

[editor]
strict_round_trip = true

[[node_types]]
name = "EchoNode"
title = "Echo"
inputs = [{ name = "text", type = "string" }]
outputs = [{ name = "echo" }]
defaults = { repeat = 2 }
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.runtime.base_url, "http://runtime.internal:9000/");
    assert_eq!(config.runtime.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.runtime.timeout_secs, 3);
    assert_eq!(config.sync.poll_interval_ms, 500);
    assert_eq!(config.sync.default_workflow, "main_loop.yaml");
    assert_eq!(config.sync.gate_type, "ApprovalNode");
    assert_eq!(config.sync.history_limit, 10);
    assert_eq!(config.layout.x_spacing, 300.0);
    assert!(config.editor.strict_round_trip);
    assert_eq!(config.editor.type_namespace, "agent/");

    assert_eq!(config.node_types.len(), 1);
    assert_eq!(config.node_types[0].outputs[0].value_type, "object");

    let registry = NodeTypeRegistry::from_config(&config);
    assert!(registry.contains("EchoNode"));
    assert!(registry.contains("agent/EchoNode"));
    assert!(registry.contains("GateNode"));
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("FLOWDECK_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[runtime]
api_key = "${FLOWDECK_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.runtime.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("FLOWDECK_TEST_API_KEY");
}

#[test]
fn test_minimal_config_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[runtime]\n").expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.runtime.base_url, "http://localhost:8000");
    assert_eq!(config.runtime.api_key, None);
    assert_eq!(config.sync.poll_interval_ms, 2000);
    assert_eq!(config.sync.default_workflow, "default_agent_loop.yaml");
    assert_eq!(config.sync.gate_type, "GateNode");
    assert_eq!(config.layout.x_spacing, 250.0);
    assert_eq!(config.layout.y_spacing, 150.0);
    assert_eq!(config.layout.margin, 100.0);
    assert!(!config.editor.strict_round_trip);
    assert!(config.node_types.is_empty());
}

#[test]
fn test_missing_file_is_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let result = AppConfig::load(&dir.path().join("nope.toml"));
    assert!(result.is_err());
}

#[test]
fn test_explicit_path_wins_discovery() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[sync]\nhistory_limit = 7\n").expect("write toml");

    let config = AppConfig::discover(Some(tmp.path())).expect("discover config");
    assert_eq!(config.sync.history_limit, 7);
}

#[test]
fn test_invalid_toml_is_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[sync\npoll_interval_ms = ").expect("write toml");
    assert!(AppConfig::load(tmp.path()).is_err());
}
