//! # Teamline Approval
//!
//! The task approval workflow core: decides whether a task must be
//! reviewed before completion, who reviews it, and what happens when
//! nobody does in time.
//!
//! ## Architecture
//! ```text
//! Task submitted for approval
//!   → ApprovalEngine.submit(task_id)
//!     → load policy (per project)
//!     → matcher: first enabled rule whose conditions all hold
//!       → (or fall back to the policy's global settings)
//!     → copy checklist template, stamp auto-approve/escalate timers
//!     → resolver: approver spec → concrete users
//!     → append one PENDING approval request, notify approvers
//!
//! Sweeps (teamline-scheduler)
//!   ├── auto-approve: due timer + required checklist done → DONE
//!   └── escalate: due timer → notify escalation audience, once
//! ```
//!
//! All sweep-side completions are conditional updates keyed on
//! `status = 'pending_approval'`, so a concurrent manual decision can
//! never be overwritten.

pub mod engine;
pub mod matcher;
pub mod memory;
pub mod policy;
pub mod presets;
pub mod resolver;
pub mod store;

pub use engine::{
    ApprovalEngine, AutoApproveOutcome, ChecklistItemUpdate, EscalateOutcome, StatusInfo,
    SubmitOutcome, can_approve,
};
pub use matcher::match_rule;
pub use memory::{InMemoryDirectory, InMemoryMembership, RecordingSink};
pub use policy::{
    ApprovalPolicy, ApprovalRule, ApproverSpec, ChecklistTemplateItem, EscalationTarget,
    PolicyUpdate, RuleActions, RuleConditions, RuleUpdate,
};
pub use presets::{ChecklistPreset, apply_preset, find_preset, list_presets};
pub use resolver::resolve_approvers;
pub use store::{ApprovalDb, SharedCollaborators, SqliteCollaborators};
