pub mod approval;
pub mod client;
pub mod driver;
pub mod scheduler;
pub mod session;

pub use approval::{ApprovalTracker, Offer};
pub use client::{validate_workflow_name, HttpRuntimeClient};
pub use driver::{SyncDriver, TickOutcome};
pub use scheduler::{IntervalTicks, ManualTicks, ManualTrigger, TickSource};
pub use session::{ApplyOutcome, FetchTicket, GateChange, ReconcilerSession};
