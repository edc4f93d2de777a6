use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// The agent runtime, as seen by the editor.
///
/// Every failure, including non-success HTTP statuses, surfaces as
/// `FlowdeckError::Transport` so the poll driver can treat it uniformly.
pub trait RuntimeClient: Send + Sync + 'static {
    /// Fetch a persisted workflow definition by file name.
    fn fetch_definition(&self, name: &str) -> BoxFuture<'_, Result<WorkflowDefinition>>;

    /// Fetch every live instance, in the order the runtime reports them.
    fn fetch_active(&self) -> BoxFuture<'_, Result<Vec<ActiveInstance>>>;

    /// Fetch the most recent runs, newest first.
    fn fetch_history(&self, limit: usize) -> BoxFuture<'_, Result<Vec<RunSummary>>>;

    /// Fetch the final state of one finished run.
    fn fetch_run(&self, run_id: &str) -> BoxFuture<'_, Result<HistoricalRun>>;

    /// Persist a definition under `name`.
    fn save_definition(
        &self,
        name: &str,
        definition: &WorkflowDefinition,
    ) -> BoxFuture<'_, Result<Acknowledgement>>;

    /// Release the gate holding `request_id`.
    fn approve_gate(&self, request_id: &str) -> BoxFuture<'_, Result<Acknowledgement>>;
}
