use std::collections::HashSet;

use tracing::{debug, info, warn};

use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::event::EventBus;
use flowdeck_core::types::{ApprovalRequest, SyncEvent};

/// What happened when a gate was offered to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// A new request was surfaced.
    Issued,
    /// The same request is already outstanding.
    AlreadyOutstanding,
    /// The operator already resolved this gate node under this request id.
    AlreadyResolved,
}

/// Tracks the single outstanding approval and every gate the operator has
/// resolved.
///
/// A resolved gate is keyed by `(request_id, node_id)`: one run may pass
/// several gates under the same request id, and each is a new request.
/// Resolved gates are never surfaced again. If the runtime keeps reporting a
/// gate the operator already answered, that is logged once and otherwise
/// ignored.
pub struct ApprovalTracker {
    outstanding: Option<ApprovalRequest>,
    resolved: HashSet<(String, String)>,
    reported: HashSet<(String, String)>,
    event_bus: EventBus,
}

impl ApprovalTracker {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            outstanding: None,
            resolved: HashSet::new(),
            reported: HashSet::new(),
            event_bus,
        }
    }

    pub fn outstanding(&self) -> Option<&ApprovalRequest> {
        self.outstanding.as_ref()
    }

    pub fn is_resolved(&self, request_id: &str, node_id: &str) -> bool {
        self.resolved
            .contains(&(request_id.to_string(), node_id.to_string()))
    }

    /// Surface `request` unless it is already outstanding or resolved.
    ///
    /// Any other outstanding request is cleared first, so at most one
    /// request is ever outstanding.
    pub fn offer(&mut self, request: ApprovalRequest) -> Offer {
        if let Some(ref current) = self.outstanding {
            if current.request_id == request.request_id && current.node_id == request.node_id {
                return Offer::AlreadyOutstanding;
            }
        }

        let key = (request.request_id.clone(), request.node_id.clone());
        if self.resolved.contains(&key) {
            if self.reported.insert(key) {
                warn!(
                    request_id = %request.request_id,
                    node_id = %request.node_id,
                    "Runtime still reports a resolved gate; not re-issuing"
                );
            }
            return Offer::AlreadyResolved;
        }

        self.clear_external();
        info!(
            request_id = %request.request_id,
            node_id = %request.node_id,
            "Approval requested"
        );
        self.event_bus.publish(SyncEvent::ApprovalRequested {
            request: request.clone(),
        });
        self.outstanding = Some(request);
        Offer::Issued
    }

    /// Return the outstanding request for `request_id`.
    pub fn get(&self, request_id: &str) -> Result<&ApprovalRequest> {
        self.outstanding
            .as_ref()
            .filter(|r| r.request_id == request_id)
            .ok_or_else(|| FlowdeckError::NoOutstandingApproval(request_id.to_string()))
    }

    /// Operator answered: clear the request and remember its gate.
    pub fn resolve(&mut self, request_id: &str, approved: bool) -> Result<ApprovalRequest> {
        self.get(request_id)?;
        let request = self
            .outstanding
            .take()
            .ok_or_else(|| FlowdeckError::NoOutstandingApproval(request_id.to_string()))?;

        self.resolved
            .insert((request.request_id.clone(), request.node_id.clone()));
        info!(request_id = %request_id, approved, "Approval resolved");
        self.event_bus.publish(SyncEvent::ApprovalResolved {
            request_id: request_id.to_string(),
            approved,
        });
        Ok(request)
    }

    /// The runtime moved on without an operator response.
    pub fn clear_external(&mut self) -> Option<ApprovalRequest> {
        let request = self.outstanding.take()?;
        debug!(request_id = %request.request_id, "Approval cleared by runtime");
        self.event_bus.publish(SyncEvent::ApprovalCleared {
            request_id: request.request_id.clone(),
        });
        Some(request)
    }

    /// Drop the outstanding request without notifying anyone.
    pub fn discard(&mut self) {
        self.outstanding = None;
    }

    /// Forget everything, including resolved ids.
    pub fn reset(&mut self) {
        self.outstanding = None;
        self.resolved.clear();
        self.reported.clear();
    }
}
