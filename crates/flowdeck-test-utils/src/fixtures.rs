use serde_json::{Map, Value};

use flowdeck_core::types::*;

pub const DEFAULT_WORKFLOW: &str = "default_agent_loop.yaml";

/// Input -> PromptBuilder -> SimpleLLM -> Output.
pub fn linear_chain() -> WorkflowDefinition {
    WorkflowDefinition::new(vec![
        NodeDescriptor::new("InputNode", "InputNode"),
        NodeDescriptor::new("PromptBuilderNode", "PromptBuilderNode").with_connection(
            "user_text",
            "InputNode",
            "user_text",
        ),
        NodeDescriptor::new("SimpleLLMNode", "SimpleLLMNode")
            .with_property("model_tier", Value::String("fast".into()))
            .with_connection("messages", "PromptBuilderNode", "messages"),
        NodeDescriptor::new("OutputNode", "OutputNode").with_connection(
            "final_output",
            "SimpleLLMNode",
            "response",
        ),
    ])
}

/// An agent loop that pauses at a gate before running tools.
///
/// Input -> LLM -> ToolParser -> Gate -> ToolExecutor -> Output
pub fn gate_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new(vec![
        NodeDescriptor::new("InputNode", "InputNode"),
        NodeDescriptor::new("SimpleLLMNode", "SimpleLLMNode").with_connection(
            "user_text",
            "InputNode",
            "user_text",
        ),
        NodeDescriptor::new("ToolParserNode", "ToolParserNode").with_connection(
            "llm_response",
            "SimpleLLMNode",
            "response",
        ),
        NodeDescriptor::new("GateNode", "GateNode").with_connection(
            "input_value",
            "ToolParserNode",
            "tool_call_data",
        ),
        NodeDescriptor::new("ToolExecutorNode", "ToolExecutorNode").with_connection(
            "tool_call_data",
            "GateNode",
            "output",
        ),
        NodeDescriptor::new("OutputNode", "OutputNode").with_connection(
            "final_output",
            "ToolExecutorNode",
            "tool_result",
        ),
    ])
}

/// Two gates in one run, each guarding its own tool call.
///
/// Input -> Gate1 -> Exec -> Gate2 -> Output
pub fn double_gate_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new(vec![
        NodeDescriptor::new("InputNode", "InputNode"),
        NodeDescriptor::new("Gate1", "GateNode").with_connection(
            "input_value",
            "InputNode",
            "tool_result",
        ),
        NodeDescriptor::new("Exec", "ToolExecutorNode").with_connection(
            "tool_call_data",
            "Gate1",
            "output",
        ),
        NodeDescriptor::new("Gate2", "GateNode").with_connection(
            "input_value",
            "Exec",
            "tool_result",
        ),
        NodeDescriptor::new("OutputNode", "OutputNode").with_connection(
            "final_output",
            "Gate2",
            "output",
        ),
    ])
}

/// Two nodes where the second points at a node that does not exist.
pub fn dangling_definition() -> WorkflowDefinition {
    WorkflowDefinition::new(vec![
        NodeDescriptor::new("InputNode", "InputNode"),
        NodeDescriptor::new("OutputNode", "OutputNode").with_connection(
            "final_output",
            "GhostNode",
            "response",
        ),
    ])
}

fn outputs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// A live instance with the given `node_outputs` object.
pub fn instance(request_id: &str, node_outputs: Value) -> ActiveInstance {
    ActiveInstance {
        request_id: request_id.to_string(),
        snapshot: ExecutionSnapshot::from_outputs(outputs(node_outputs)),
    }
}

/// A live instance that names the definition it runs.
pub fn named_instance(request_id: &str, workflow_name: &str, node_outputs: Value) -> ActiveInstance {
    let mut inst = instance(request_id, node_outputs);
    inst.snapshot.workflow_name = Some(workflow_name.to_string());
    inst
}

pub fn historical_run(workflow_name: &str, node_outputs: Value, failed: bool) -> HistoricalRun {
    HistoricalRun {
        id: None,
        workflow_name: workflow_name.to_string(),
        final_state: ExecutionSnapshot::from_outputs(outputs(node_outputs)),
        status: Some(if failed { "FAILED" } else { "COMPLETED" }.to_string()),
        error: failed.then(|| "node raised".to_string()),
    }
}

pub fn run_summary(id: &str, workflow_name: &str, status: &str) -> RunSummary {
    RunSummary {
        id: id.to_string(),
        workflow_name: workflow_name.to_string(),
        start_time: 1_700_000_000.0,
        end_time: Some(1_700_000_005.0),
        status: status.to_string(),
        error: None,
    }
}
