use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowdeck_core::config::{AppConfig, LayoutConfig, SyncConfig};
use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::event::EventBus;
use flowdeck_core::traits::RuntimeClient;
use flowdeck_core::types::{Acknowledgement, HistoricalRun, RunSummary, SyncEvent};
use flowdeck_graph::{serialize, verify_round_trip, GraphBuilder, NodeTypeRegistry, TopologicalLayout};

use crate::scheduler::TickSource;
use crate::session::{ApplyOutcome, ReconcilerSession};

/// What one poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session is not polling.
    Inactive,
    /// The runtime reports no live instance.
    Empty,
    Applied(ApplyOutcome),
    /// The poll failed; the next tick retries.
    Degraded,
}

/// Feeds a [`ReconcilerSession`] from a [`RuntimeClient`].
pub struct SyncDriver<C: RuntimeClient> {
    client: C,
    registry: NodeTypeRegistry,
    session: ReconcilerSession,
    sync: SyncConfig,
    layout: LayoutConfig,
    strict_round_trip: bool,
    /// Name of the definition last loaded successfully.
    requested: Option<String>,
    /// Name whose fetch last failed, so repeated retries warn once.
    unavailable: Option<String>,
    degraded: bool,
}

impl<C: RuntimeClient> SyncDriver<C> {
    pub fn new(client: C, config: &AppConfig, event_bus: EventBus) -> Self {
        Self {
            client,
            registry: NodeTypeRegistry::from_config(config),
            session: ReconcilerSession::new(&config.sync, event_bus),
            sync: config.sync.clone(),
            layout: config.layout,
            strict_round_trip: config.editor.strict_round_trip,
            requested: None,
            unavailable: None,
            degraded: false,
        }
    }

    pub fn session(&self) -> &ReconcilerSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ReconcilerSession {
        &mut self.session
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Start live polling and show the default definition until an
    /// instance says otherwise.
    pub async fn start_polling(&mut self) {
        self.session.start_polling();
        let default = self.sync.default_workflow.clone();
        if let Err(e) = self.ensure_definition(&default).await {
            self.degrade(&e);
        }
    }

    pub fn stop_polling(&mut self) {
        self.session.stop_polling();
    }

    pub fn dispose(&mut self) {
        self.session.dispose();
        self.requested = None;
        self.unavailable = None;
        self.degraded = false;
    }

    /// Poll once.
    ///
    /// Only the first reported instance is reconciled. An instance that
    /// names its definition gets that definition loaded first.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.session.is_polling() {
            return TickOutcome::Inactive;
        }
        let ticket = self.session.begin_fetch();

        let active = match self.client.fetch_active().await {
            Ok(active) => active,
            Err(e) => {
                self.degrade(&e);
                return TickOutcome::Degraded;
            }
        };
        self.restore();

        let Some(instance) = active.into_iter().next() else {
            self.session.clear_instance();
            return TickOutcome::Empty;
        };

        let name = instance
            .snapshot
            .workflow_name
            .clone()
            .unwrap_or_else(|| self.sync.default_workflow.clone());
        if let Err(e) = self.ensure_definition(&name).await {
            self.degrade(&e);
            return TickOutcome::Degraded;
        }

        let outcome = self
            .session
            .apply_snapshot(&ticket, &instance.request_id, &instance.snapshot);
        TickOutcome::Applied(outcome)
    }

    /// Poll on every tick until the ticks end or `cancel` fires, then stop.
    pub async fn run<T: TickSource>(&mut self, mut ticks: T, cancel: CancellationToken) {
        info!(session = %self.session.id(), "Sync loop started");
        loop {
            tokio::select! {
                tick = ticks.next_tick() => {
                    if tick.is_none() {
                        debug!("Tick source exhausted");
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
            tokio::select! {
                outcome = self.tick() => debug!(?outcome, "Tick complete"),
                _ = cancel.cancelled() => break,
            }
        }
        self.stop_polling();
        info!(session = %self.session.id(), "Sync loop stopped");
    }

    /// Load `name` into the session unless it is already loaded.
    ///
    /// A non-default name that cannot be fetched falls back to the default
    /// definition, and is fetched again on the next call. Returns whether
    /// the displayed graph was replaced.
    pub async fn ensure_definition(&mut self, name: &str) -> Result<bool> {
        if self.requested.as_deref() == Some(name) && self.session.definition_name().is_some() {
            return Ok(false);
        }

        let default = self.sync.default_workflow.clone();
        let (loaded_name, definition) = match self.client.fetch_definition(name).await {
            Ok(def) => {
                self.unavailable = None;
                (name.to_string(), def)
            }
            Err(e) if name != default => {
                if self.unavailable.as_deref() == Some(name) {
                    debug!(definition = %name, error = %e, "Definition still unavailable");
                } else {
                    warn!(definition = %name, error = %e, "Definition unavailable, using default");
                    self.unavailable = Some(name.to_string());
                }
                if self.session.definition_name() == Some(default.as_str()) {
                    return Ok(false);
                }
                (default.clone(), self.client.fetch_definition(&default).await?)
            }
            Err(e) => return Err(e),
        };

        let mut report = GraphBuilder::new(&self.registry).build(&definition);
        match TopologicalLayout::new(self.layout).layout(&report.graph) {
            Ok(layout) => report.graph.apply_layout(&layout),
            Err(e) => warn!(definition = %loaded_name, error = %e, "Layout skipped"),
        }
        self.session.load_definition(&loaded_name, report);
        self.requested = Some(loaded_name);
        Ok(true)
    }

    /// Show the final state of a finished run. Live polling stops.
    pub async fn load_historical_run(&mut self, run_id: &str) -> Result<HistoricalRun> {
        self.session.load_historical(run_id);
        let ticket = self.session.begin_fetch();

        let run = self.client.fetch_run(run_id).await?;
        self.ensure_definition(&run.workflow_name).await?;

        let outcome = self.session.apply_snapshot(&ticket, run_id, &run.final_state);
        if outcome != ApplyOutcome::Discarded && run.is_failed() {
            let failed = self.session.mark_failed_frontier(&run.final_state);
            info!(run_id = %run_id, failed = ?failed, "Failed run loaded");
        }
        Ok(run)
    }

    pub async fn fetch_history(&self) -> Result<Vec<RunSummary>> {
        self.client.fetch_history(self.sync.history_limit).await
    }

    /// Answer the outstanding approval.
    ///
    /// Approving releases the gate on the runtime first; if that fails the
    /// request stays outstanding. Denying is recorded locally only.
    pub async fn submit_approval(
        &mut self,
        request_id: &str,
        approved: bool,
    ) -> Result<Option<Acknowledgement>> {
        self.session.begin_approval(request_id)?;

        if !approved {
            self.session.complete_approval(request_id, false)?;
            return Ok(None);
        }

        let ack = self.client.approve_gate(request_id).await.map_err(|e| {
            warn!(request_id = %request_id, error = %e, "Approval failed, gate still outstanding");
            e
        })?;
        self.session.complete_approval(request_id, true)?;
        Ok(Some(ack))
    }

    /// Serialize the displayed graph and persist it under `name`.
    pub async fn save(&self, name: &str) -> Result<Acknowledgement> {
        let graph = self.session.graph();
        if let Err(e) = verify_round_trip(graph, &self.registry) {
            if self.strict_round_trip {
                return Err(e);
            }
            warn!(definition = %name, error = %e, "Saving graph that does not round-trip");
        }
        let definition = serialize(graph);
        let ack = self.client.save_definition(name, &definition).await?;
        info!(definition = %name, message = %ack.message, "Definition saved");
        Ok(ack)
    }

    fn degrade(&mut self, error: &FlowdeckError) {
        if self.degraded {
            debug!(error = %error, "Poll still failing");
            return;
        }
        self.degraded = true;
        warn!(error = %error, "Runtime unreachable, will retry");
        self.session.event_bus().publish(SyncEvent::ConnectionDegraded {
            error: error.to_string(),
        });
    }

    fn restore(&mut self) {
        if !self.degraded {
            return;
        }
        self.degraded = false;
        info!("Runtime reachable again");
        self.session.event_bus().publish(SyncEvent::ConnectionRestored);
    }
}
