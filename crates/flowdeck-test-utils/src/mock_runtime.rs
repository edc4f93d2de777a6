use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;

use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::traits::RuntimeClient;
use flowdeck_core::types::*;

#[derive(Default)]
struct MockState {
    definitions: HashMap<String, WorkflowDefinition>,
    /// One-shot responses for `fetch_active`; `Err` holds a transport message.
    queued_active: VecDeque<std::result::Result<Vec<ActiveInstance>, String>>,
    /// Returned once the queue is empty.
    steady_active: Vec<ActiveInstance>,
    runs: HashMap<String, HistoricalRun>,
    history: Vec<RunSummary>,
    fail_approvals: bool,
    approvals: Vec<String>,
    saves: Vec<(String, WorkflowDefinition)>,
    definition_fetches: Vec<String>,
    active_fetches: usize,
}

/// In-memory [`RuntimeClient`]. Clones share state, so a test can keep a
/// handle while the driver owns another.
#[derive(Clone, Default)]
pub struct MockRuntimeClient {
    state: Arc<Mutex<MockState>>,
}

impl MockRuntimeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_definition(self, name: &str, definition: WorkflowDefinition) -> Self {
        self.add_definition(name, definition);
        self
    }

    pub fn add_definition(&self, name: &str, definition: WorkflowDefinition) {
        self.state().definitions.insert(name.to_string(), definition);
    }

    /// Queue one `fetch_active` response.
    pub fn push_active(&self, instances: Vec<ActiveInstance>) {
        self.state().queued_active.push_back(Ok(instances));
    }

    /// Queue one failing `fetch_active` call.
    pub fn push_active_error(&self, message: &str) {
        self.state().queued_active.push_back(Err(message.to_string()));
    }

    /// Response used whenever nothing is queued.
    pub fn set_active(&self, instances: Vec<ActiveInstance>) {
        self.state().steady_active = instances;
    }

    pub fn add_run(&self, run_id: &str, run: HistoricalRun) {
        self.state().runs.insert(run_id.to_string(), run);
    }

    pub fn set_history(&self, history: Vec<RunSummary>) {
        self.state().history = history;
    }

    pub fn fail_approvals(&self, fail: bool) {
        self.state().fail_approvals = fail;
    }

    /// Request ids the runtime was asked to release.
    pub fn approvals(&self) -> Vec<String> {
        self.state().approvals.clone()
    }

    pub fn saves(&self) -> Vec<(String, WorkflowDefinition)> {
        self.state().saves.clone()
    }

    /// Names passed to `fetch_definition`, in call order.
    pub fn definition_fetches(&self) -> Vec<String> {
        self.state().definition_fetches.clone()
    }

    pub fn active_fetches(&self) -> usize {
        self.state().active_fetches
    }
}

impl RuntimeClient for MockRuntimeClient {
    fn fetch_definition(&self, name: &str) -> BoxFuture<'_, Result<WorkflowDefinition>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut state = self.state();
            state.definition_fetches.push(name.clone());
            state
                .definitions
                .get(&name)
                .cloned()
                .ok_or_else(|| FlowdeckError::Transport(format!("HTTP 404: {name} not found")))
        })
    }

    fn fetch_active(&self) -> BoxFuture<'_, Result<Vec<ActiveInstance>>> {
        Box::pin(async move {
            let mut state = self.state();
            state.active_fetches += 1;
            match state.queued_active.pop_front() {
                Some(Ok(instances)) => Ok(instances),
                Some(Err(message)) => Err(FlowdeckError::Transport(message)),
                None => Ok(state.steady_active.clone()),
            }
        })
    }

    fn fetch_history(&self, limit: usize) -> BoxFuture<'_, Result<Vec<RunSummary>>> {
        Box::pin(async move { Ok(self.state().history.iter().take(limit).cloned().collect()) })
    }

    fn fetch_run(&self, run_id: &str) -> BoxFuture<'_, Result<HistoricalRun>> {
        let run_id = run_id.to_string();
        Box::pin(async move {
            self.state()
                .runs
                .get(&run_id)
                .cloned()
                .ok_or_else(|| FlowdeckError::Transport(format!("HTTP 404: run {run_id} not found")))
        })
    }

    fn save_definition(
        &self,
        name: &str,
        definition: &WorkflowDefinition,
    ) -> BoxFuture<'_, Result<Acknowledgement>> {
        let name = name.to_string();
        let definition = definition.clone();
        Box::pin(async move {
            self.state().saves.push((name.clone(), definition));
            Ok(Acknowledgement {
                message: format!("Workflow '{name}' saved"),
            })
        })
    }

    fn approve_gate(&self, request_id: &str) -> BoxFuture<'_, Result<Acknowledgement>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let mut state = self.state();
            if state.fail_approvals {
                return Err(FlowdeckError::Transport("HTTP 500: approve failed".into()));
            }
            state.approvals.push(request_id.clone());
            Ok(Acknowledgement {
                message: format!("Approved {request_id}"),
            })
        })
    }
}
