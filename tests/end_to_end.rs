use serde_json::json;

use flowdeck_core::config::AppConfig;
use flowdeck_core::error::{DanglingReason, FlowdeckError};
use flowdeck_core::event::EventBus;
use flowdeck_core::types::*;
use flowdeck_graph::{
    serialize, verify_round_trip, ExecutionStatus, GraphBuilder, GraphEdge, NodeTypeRegistry,
    TopologicalLayout,
};
use flowdeck_sync::{ApplyOutcome, GateChange, ManualTicks, SyncDriver, TickOutcome};
use flowdeck_test_utils::*;
use tokio_util::sync::CancellationToken;

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn count_requests(events: &[SyncEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SyncEvent::ApprovalRequested { .. }))
        .count()
}

#[test]
fn scenario_a_linear_chain_builds_and_lays_out() {
    let registry = NodeTypeRegistry::with_builtins();
    let report = GraphBuilder::new(&registry).build(&linear_chain());
    assert!(report.is_clean());
    assert_eq!(report.graph.len(), 4);
    assert_eq!(report.graph.edges().len(), 3);

    let layout = TopologicalLayout::default().layout(&report.graph).unwrap();
    let ids = ["InputNode", "PromptBuilderNode", "SimpleLLMNode", "OutputNode"];
    let ranks: Vec<usize> = ids.iter().map(|id| layout.rank(id).unwrap()).collect();
    assert_eq!(ranks, vec![0, 1, 2, 3]);

    let xs: Vec<f64> = ids.iter().map(|id| layout.position(id).unwrap().x).collect();
    assert!(xs.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn scenario_b_gate_raises_one_request() {
    let client = MockRuntimeClient::new().with_definition(DEFAULT_WORKFLOW, gate_workflow());
    client.set_active(vec![instance(
        "req-42",
        json!({"InputNode": "hi", "GateNode": {"tool": "x"}}),
    )]);
    let mut driver = SyncDriver::new(client, &AppConfig::default(), EventBus::default());
    let mut rx = driver.session().event_bus().subscribe();

    driver.start_polling().await;
    driver.tick().await;
    driver.tick().await;

    let session = driver.session();
    assert_eq!(session.state(), SessionState::GateActive);
    assert_eq!(
        session.graph().node("GateNode").unwrap().status,
        ExecutionStatus::Gated
    );
    let request = session.outstanding_approval().unwrap();
    assert_eq!(request.request_id, "req-42");
    assert_eq!(request.tool_call, json!({"tool": "x"}));
    assert_eq!(count_requests(&drain(&mut rx)), 1);
}

#[tokio::test]
async fn scenario_c_approved_gate_not_reissued() {
    let client = MockRuntimeClient::new().with_definition(DEFAULT_WORKFLOW, gate_workflow());
    client.set_active(vec![instance(
        "req-42",
        json!({"InputNode": "hi", "GateNode": {"tool": "x"}}),
    )]);
    let mut driver = SyncDriver::new(client.clone(), &AppConfig::default(), EventBus::default());
    driver.start_polling().await;
    driver.tick().await;

    let mut rx = driver.session().event_bus().subscribe();
    driver.submit_approval("req-42", true).await.unwrap();
    assert!(driver.session().outstanding_approval().is_none());
    assert_eq!(client.approvals(), vec!["req-42"]);

    // The runtime has not moved on yet.
    let outcome = driver.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::Applied(ApplyOutcome::Applied {
            statuses_changed: false,
            gate: GateChange::Unchanged
        })
    );
    assert!(driver.session().outstanding_approval().is_none());
    assert_eq!(driver.session().state(), SessionState::Polling);

    let events = drain(&mut rx);
    assert_eq!(count_requests(&events), 0);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::ApprovalResolved { request_id, approved: true } if request_id == "req-42"
    )));
}

#[tokio::test]
async fn each_gate_in_a_run_is_raised() {
    let client = MockRuntimeClient::new().with_definition(DEFAULT_WORKFLOW, double_gate_workflow());
    client.push_active(vec![instance(
        "req-1",
        json!({"InputNode": "hi", "Gate1": {"tool": "a"}}),
    )]);
    client.set_active(vec![instance(
        "req-1",
        json!({"InputNode": "hi", "Gate1": {"tool": "a"}, "Exec": "ok", "Gate2": {"tool": "b"}}),
    )]);
    let mut driver = SyncDriver::new(client.clone(), &AppConfig::default(), EventBus::default());
    let mut rx = driver.session().event_bus().subscribe();
    driver.start_polling().await;

    driver.tick().await;
    assert_eq!(driver.session().outstanding_approval().unwrap().node_id, "Gate1");
    driver.submit_approval("req-1", true).await.unwrap();

    driver.tick().await;
    let request = driver.session().outstanding_approval().unwrap();
    assert_eq!(request.request_id, "req-1");
    assert_eq!(request.node_id, "Gate2");
    assert_eq!(request.tool_call, json!({"tool": "b"}));
    assert_eq!(driver.session().state(), SessionState::GateActive);

    driver.submit_approval("req-1", true).await.unwrap();
    assert_eq!(client.approvals(), vec!["req-1", "req-1"]);
    assert_eq!(count_requests(&drain(&mut rx)), 2);
}

#[test]
fn scenario_d_missing_source_is_dropped() {
    let registry = NodeTypeRegistry::with_builtins();
    let mut definition = linear_chain();
    definition.nodes[2] = NodeDescriptor::new("SimpleLLMNode", "SimpleLLMNode").with_connection(
        "messages",
        "missing",
        "messages",
    );

    let report = GraphBuilder::new(&registry).build(&definition);
    assert_eq!(report.graph.len(), 4);
    assert_eq!(report.diagnostics.len(), 1);
    assert!(matches!(
        report.diagnostics[0],
        FlowdeckError::DanglingEdge {
            ref target_node,
            reason: DanglingReason::MissingNode,
            ..
        } if target_node == "SimpleLLMNode"
    ));
    assert_eq!(
        report.graph.edges(),
        vec![
            GraphEdge::new("InputNode", "user_text", "PromptBuilderNode", "user_text"),
            GraphEdge::new("SimpleLLMNode", "response", "OutputNode", "final_output"),
        ]
    );

    let dangling = GraphBuilder::new(&registry).build(&dangling_definition());
    assert_eq!(dangling.diagnostics_for("OutputNode").len(), 1);
    assert!(dangling.graph.edges().is_empty());
}

#[test]
fn direct_definitions_round_trip() {
    let registry = NodeTypeRegistry::with_builtins();
    for definition in [linear_chain(), gate_workflow()] {
        let graph = GraphBuilder::new(&registry).build(&definition).graph;
        assert_eq!(serialize(&graph), definition);
        assert!(verify_round_trip(&graph, &registry).is_ok());

        let rebuilt = GraphBuilder::new(&registry).build(&serialize(&graph)).graph;
        assert_eq!(rebuilt.edges(), graph.edges());
    }
}

#[test]
fn yaml_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.yaml");
    std::fs::write(&path, gate_workflow().to_yaml().unwrap()).unwrap();

    let loaded = WorkflowDefinition::from_path(&path).unwrap();
    assert_eq!(loaded, gate_workflow());
}

#[test]
fn identical_snapshot_updates_once() {
    let registry = NodeTypeRegistry::with_builtins();
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let mut session =
        flowdeck_sync::ReconcilerSession::new(&AppConfig::default().sync, bus.clone());
    session.load_definition(DEFAULT_WORKFLOW, GraphBuilder::new(&registry).build(&linear_chain()));
    session.start_polling();

    let inst = instance("req-1", json!({"InputNode": "hi", "PromptBuilderNode": []}));
    let ticket = session.begin_fetch();
    session.apply_snapshot(&ticket, &inst.request_id, &inst.snapshot);
    session.apply_snapshot(&ticket, &inst.request_id, &inst.snapshot);

    let updates = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::StatusesChanged { .. }))
        .count();
    assert_eq!(updates, 1);
}

#[test]
fn fetch_in_flight_at_stop_is_discarded() {
    let registry = NodeTypeRegistry::with_builtins();
    let mut session =
        flowdeck_sync::ReconcilerSession::new(&AppConfig::default().sync, EventBus::default());
    session.load_definition(DEFAULT_WORKFLOW, GraphBuilder::new(&registry).build(&gate_workflow()));
    session.start_polling();

    let ticket = session.begin_fetch();
    session.stop_polling();
    let inst = instance("req-1", json!({"InputNode": "hi", "GateNode": {}}));
    assert_eq!(
        session.apply_snapshot(&ticket, &inst.request_id, &inst.snapshot),
        ApplyOutcome::Discarded
    );
    assert!(session.outstanding_approval().is_none());
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn execution_order_decides_gate() {
    let client = MockRuntimeClient::new().with_definition(DEFAULT_WORKFLOW, gate_workflow());
    // Map order says the gate ran last; the trace says the executor did.
    let mut inst = instance(
        "req-1",
        json!({"InputNode": "hi", "ToolExecutorNode": {}, "GateNode": {}}),
    );
    inst.snapshot.execution_order = Some(vec![
        "InputNode".into(),
        "GateNode".into(),
        "ToolExecutorNode".into(),
    ]);
    client.set_active(vec![inst]);

    let mut driver = SyncDriver::new(client, &AppConfig::default(), EventBus::default());
    driver.start_polling().await;
    driver.tick().await;
    assert!(driver.session().outstanding_approval().is_none());
    assert_eq!(driver.session().state(), SessionState::Polling);
}

#[tokio::test]
async fn denied_gate_stays_local() {
    let client = MockRuntimeClient::new().with_definition(DEFAULT_WORKFLOW, gate_workflow());
    client.set_active(vec![instance("req-1", json!({"InputNode": "hi", "GateNode": {}}))]);
    let mut driver = SyncDriver::new(client.clone(), &AppConfig::default(), EventBus::default());
    driver.start_polling().await;
    driver.tick().await;

    assert_eq!(driver.submit_approval("req-1", false).await.unwrap(), None);
    assert!(client.approvals().is_empty());
    assert!(driver.session().outstanding_approval().is_none());
}

#[tokio::test]
async fn outage_is_reported_once() {
    let client = MockRuntimeClient::new().with_definition(DEFAULT_WORKFLOW, gate_workflow());
    for _ in 0..3 {
        client.push_active_error("connection refused");
    }
    let mut driver = SyncDriver::new(client.clone(), &AppConfig::default(), EventBus::default());
    let mut rx = driver.session().event_bus().subscribe();
    driver.start_polling().await;

    let (ticks, trigger) = ManualTicks::new();
    for _ in 0..4 {
        trigger.fire();
    }
    drop(trigger);
    driver.run(ticks, CancellationToken::new()).await;

    assert_eq!(client.active_fetches(), 4);
    let events = drain(&mut rx);
    let degraded = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::ConnectionDegraded { .. }))
        .count();
    let restored = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::ConnectionRestored))
        .count();
    assert_eq!((degraded, restored), (1, 1));
    assert_eq!(driver.session().state(), SessionState::Stopped);
}

#[tokio::test]
async fn history_lists_runs() {
    let client = MockRuntimeClient::new();
    client.set_history(vec![
        run_summary("run-2", DEFAULT_WORKFLOW, "COMPLETED"),
        run_summary("run-1", DEFAULT_WORKFLOW, "FAILED"),
    ]);
    let driver = SyncDriver::new(client, &AppConfig::default(), EventBus::default());
    let runs = driver.fetch_history().await.unwrap();
    let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["run-2", "run-1"]);
}
