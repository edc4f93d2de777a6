use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use flowdeck_core::config::SyncConfig;
use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::event::EventBus;
use flowdeck_core::types::{ApprovalRequest, ExecutionSnapshot, SessionState, SyncEvent, ViewMode};
use flowdeck_graph::{BuildReport, ExecutionStatus, Graph};

use crate::approval::{ApprovalTracker, Offer};

/// Proof that a fetch started under a given epoch.
///
/// A snapshot applied with a ticket from an older epoch is discarded, which
/// is how `stop_polling` wins against a fetch already in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    epoch: u64,
    mode: ViewMode,
}

impl FetchTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn mode(&self) -> &ViewMode {
        &self.mode
    }
}

/// Change in the outstanding approval caused by one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GateChange {
    #[default]
    Unchanged,
    Requested,
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Stale ticket or idle session; nothing was touched.
    Discarded,
    Applied {
        /// False when the executed-id signature matched the last one applied.
        statuses_changed: bool,
        gate: GateChange,
    },
}

impl ApplyOutcome {
    pub fn statuses_changed(&self) -> bool {
        matches!(self, Self::Applied { statuses_changed: true, .. })
    }
}

/// Reconciles a displayed graph against polled execution snapshots.
///
/// Pure state machine: every input is handed in by a driver, and every
/// visible change is published on the session's [`EventBus`].
pub struct ReconcilerSession {
    id: Uuid,
    state: SessionState,
    mode: ViewMode,
    gate_type: String,
    definition_name: Option<String>,
    graph: Graph,
    diagnostics: Vec<FlowdeckError>,
    request_id: Option<String>,
    signature: Option<String>,
    approvals: ApprovalTracker,
    epoch: u64,
    event_bus: EventBus,
}

impl ReconcilerSession {
    pub fn new(config: &SyncConfig, event_bus: EventBus) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, gate_type = %config.gate_type, "Reconciler session created");
        Self {
            id,
            state: SessionState::Idle,
            mode: ViewMode::Live,
            gate_type: config.gate_type.clone(),
            definition_name: None,
            graph: Graph::new(),
            diagnostics: Vec::new(),
            request_id: None,
            signature: None,
            approvals: ApprovalTracker::new(event_bus.clone()),
            epoch: 0,
            event_bus,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> &ViewMode {
        &self.mode
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable access for authoring. Never used while a driver polls this
    /// session.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Build diagnostics of the loaded definition.
    pub fn diagnostics(&self) -> &[FlowdeckError] {
        &self.diagnostics
    }

    pub fn definition_name(&self) -> Option<&str> {
        self.definition_name.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn outstanding_approval(&self) -> Option<&ApprovalRequest> {
        self.approvals.outstanding()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn is_polling(&self) -> bool {
        matches!(self.state, SessionState::Polling | SessionState::GateActive)
    }

    fn transition(&mut self, to: SessionState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        info!(session = %self.id, %from, %to, "Session state changed");
        self.event_bus.publish(SyncEvent::StateChanged { from, to });
    }

    fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    // -- Lifecycle --------------------------------------------------------

    /// Begin watching live instances. Any approval shown before is dropped.
    pub fn start_polling(&mut self) {
        self.bump_epoch();
        self.mode = ViewMode::Live;
        self.approvals.discard();
        self.signature = None;
        self.request_id = None;
        self.transition(SessionState::Polling);
    }

    /// Halt polling. Fetches already in flight will be discarded.
    pub fn stop_polling(&mut self) {
        self.bump_epoch();
        self.transition(SessionState::Stopped);
    }

    /// Return to a blank, idle session.
    pub fn dispose(&mut self) {
        self.bump_epoch();
        self.graph = Graph::new();
        self.diagnostics.clear();
        self.definition_name = None;
        self.request_id = None;
        self.signature = None;
        self.approvals.reset();
        self.mode = ViewMode::Live;
        self.transition(SessionState::Idle);
    }

    /// Switch to inspecting one finished run. Live polling stops.
    pub fn load_historical(&mut self, run_id: &str) {
        self.bump_epoch();
        self.approvals.clear_external();
        self.mode = ViewMode::Historical {
            run_id: run_id.to_string(),
        };
        self.request_id = None;
        self.signature = None;
        self.transition(SessionState::Stopped);
    }

    /// Replace the displayed graph wholesale.
    pub fn load_definition(&mut self, name: &str, report: BuildReport) {
        let BuildReport { graph, diagnostics } = report;
        info!(
            session = %self.id,
            definition = %name,
            nodes = graph.len(),
            diagnostics = diagnostics.len(),
            "Definition loaded"
        );
        self.event_bus.publish(SyncEvent::DefinitionLoaded {
            name: name.to_string(),
            nodes: graph.len(),
            edges: graph.edges().len(),
            diagnostics: diagnostics.len(),
        });
        self.graph = graph;
        self.diagnostics = diagnostics;
        self.definition_name = Some(name.to_string());
        self.signature = None;
    }

    // -- Snapshots --------------------------------------------------------

    pub fn begin_fetch(&self) -> FetchTicket {
        FetchTicket {
            epoch: self.epoch,
            mode: self.mode.clone(),
        }
    }

    fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.epoch == self.epoch && ticket.mode == self.mode
    }

    /// Apply one snapshot of instance `request_id`.
    pub fn apply_snapshot(
        &mut self,
        ticket: &FetchTicket,
        request_id: &str,
        snapshot: &ExecutionSnapshot,
    ) -> ApplyOutcome {
        if !self.is_current(ticket) || self.state == SessionState::Idle {
            debug!(
                session = %self.id,
                ticket_epoch = ticket.epoch,
                epoch = self.epoch,
                "Discarding stale snapshot"
            );
            return ApplyOutcome::Discarded;
        }

        if self.request_id.as_deref() != Some(request_id) {
            debug!(session = %self.id, request_id = %request_id, "Watching new instance");
            self.request_id = Some(request_id.to_string());
            self.signature = None;
        }

        let signature = snapshot.signature();
        let statuses_changed = self.signature.as_deref() != Some(signature.as_str());
        if statuses_changed {
            self.apply_statuses(snapshot);
            self.signature = Some(signature);
            self.event_bus.publish(SyncEvent::StatusesChanged {
                request_id: Some(request_id.to_string()),
                executed: snapshot.executed_ids().iter().map(|s| s.to_string()).collect(),
            });
        }

        let gate = match self.mode {
            ViewMode::Live => self.detect_gate(request_id, snapshot),
            ViewMode::Historical { .. } => GateChange::Unchanged,
        };

        ApplyOutcome::Applied {
            statuses_changed,
            gate,
        }
    }

    /// Mark the nodes a failed run stopped at.
    ///
    /// The runtime executes in topological order and records no output for
    /// the node that raised, so the failed node is one whose predecessors
    /// all executed but which did not. Returns the ids marked.
    pub fn mark_failed_frontier(&mut self, snapshot: &ExecutionSnapshot) -> Vec<String> {
        let executed: HashSet<&str> = snapshot.node_outputs.keys().map(|k| k.as_str()).collect();
        let frontier: Vec<String> = self
            .graph
            .nodes()
            .iter()
            .filter(|n| !executed.contains(n.id.as_str()))
            .filter(|n| {
                let preds = n.predecessors();
                if executed.is_empty() {
                    preds.is_empty()
                } else {
                    !preds.is_empty() && preds.iter().all(|p| executed.contains(p))
                }
            })
            .map(|n| n.id.clone())
            .collect();

        for id in &frontier {
            if let Some(node) = self.graph.node_mut(id) {
                node.set_status(ExecutionStatus::Failed, None);
            }
        }
        if !frontier.is_empty() {
            self.event_bus.publish(SyncEvent::StatusesChanged {
                request_id: self.request_id.clone(),
                executed: snapshot.executed_ids().iter().map(|s| s.to_string()).collect(),
            });
        }
        frontier
    }

    fn apply_statuses(&mut self, snapshot: &ExecutionSnapshot) {
        self.graph.reset_statuses();
        for (node_id, output) in &snapshot.node_outputs {
            if let Some(node) = self.graph.node_mut(node_id) {
                node.set_status(ExecutionStatus::Executed, Some(output.clone()));
            }
        }
        if let Some(gate_node) = self.approvals.outstanding().map(|r| r.node_id.clone()) {
            if let Some(node) = self.graph.node_mut(&gate_node) {
                node.status = ExecutionStatus::Gated;
            }
        }
    }

    fn gate_node<'s>(&self, snapshot: &'s ExecutionSnapshot) -> Option<&'s str> {
        let last = snapshot.last_executed()?;
        let node = self.graph.node(last)?;
        (node.bare_type() == self.gate_type).then_some(last)
    }

    fn detect_gate(&mut self, request_id: &str, snapshot: &ExecutionSnapshot) -> GateChange {
        let Some(node_id) = self.gate_node(snapshot) else {
            if let Some(cleared) = self.approvals.clear_external() {
                self.ungate(&cleared.node_id);
                self.transition(SessionState::Polling);
                return GateChange::Cleared;
            }
            return GateChange::Unchanged;
        };

        let request = ApprovalRequest {
            request_id: request_id.to_string(),
            node_id: node_id.to_string(),
            tool_call: snapshot.output(node_id).cloned().unwrap_or(Value::Null),
        };

        let previous = self.approvals.outstanding().map(|r| r.node_id.clone());
        match self.approvals.offer(request) {
            Offer::Issued => {
                if let Some(prev) = previous {
                    self.ungate(&prev);
                }
                if let Some(node) = self.graph.node_mut(node_id) {
                    node.status = ExecutionStatus::Gated;
                }
                self.transition(SessionState::GateActive);
                GateChange::Requested
            }
            Offer::AlreadyOutstanding => GateChange::Unchanged,
            Offer::AlreadyResolved => {
                // A different gate may still have been outstanding for an
                // older instance.
                if let Some(cleared) = self.approvals.clear_external() {
                    self.ungate(&cleared.node_id);
                    self.transition(SessionState::Polling);
                    return GateChange::Cleared;
                }
                GateChange::Unchanged
            }
        }
    }

    fn ungate(&mut self, node_id: &str) {
        if let Some(node) = self.graph.node_mut(node_id) {
            if node.status == ExecutionStatus::Gated {
                node.status = if node.last_output().is_some() {
                    ExecutionStatus::Executed
                } else {
                    ExecutionStatus::Default
                };
            }
        }
    }

    // -- Approval ---------------------------------------------------------

    /// Check that `request_id` is the outstanding approval.
    pub fn begin_approval(&self, request_id: &str) -> Result<ApprovalRequest> {
        self.approvals.get(request_id).cloned()
    }

    /// Record the operator's answer and resume polling.
    pub fn complete_approval(&mut self, request_id: &str, approved: bool) -> Result<ApprovalRequest> {
        let request = self.approvals.resolve(request_id, approved)?;
        self.ungate(&request.node_id);
        if self.state == SessionState::GateActive {
            self.transition(SessionState::Polling);
        }
        Ok(request)
    }

    /// The watched instance disappeared from the runtime.
    pub fn clear_instance(&mut self) {
        if self.request_id.take().is_none() {
            return;
        }
        debug!(session = %self.id, "Watched instance finished");
        if let Some(cleared) = self.approvals.clear_external() {
            self.ungate(&cleared.node_id);
        }
        if self.state == SessionState::GateActive {
            self.transition(SessionState::Polling);
        }
    }
}
