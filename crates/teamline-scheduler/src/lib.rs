//! # Teamline Scheduler
//!
//! Periodic sweeps over pending approvals. Two independent loops, each
//! on its own tokio interval:
//!
//! ```text
//! auto-approval sweep (default hourly)
//!   └── due timer + required checklist done → task DONE, auto_approved
//!
//! escalation sweep (default daily)
//!   └── due timer, not yet sent → notify escalation audience, once
//! ```
//!
//! Each sweep picks candidates with an indexed store query, then
//! re-validates every task under the engine lock; per-task failures are
//! counted and logged, never aborting the rest of the sweep.

pub mod sweeps;

pub use sweeps::{AutoApproveSummary, EscalationSummary, Sweeper, spawn_sweep_loops};
