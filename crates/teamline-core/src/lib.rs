//! # Teamline Core
//!
//! Shared foundation for the Teamline approval workflow:
//! - Error type and `Result` alias used across all crates
//! - Configuration loading (`~/.teamline/config.toml`)
//! - The approval-relevant task model and project membership model
//! - Collaborator traits (membership, user directory, notifications)
//!
//! The wider Teamline product (workspace/project/task CRUD, comments,
//! auth, the web UI) lives outside this workspace; everything it must
//! provide to the approval core is expressed as a trait in [`traits`].

pub mod config;
pub mod error;
pub mod task;
pub mod traits;
pub mod user;

pub use config::TeamlineConfig;
pub use error::{Result, TeamlineError};
pub use task::{
    ApprovalConfig, ApprovalRequest, ApprovalStatus, ChecklistItem, RequestStatus, Task,
    TaskPriority, TaskStatus, TaskType,
};
pub use traits::{
    MembershipProvider, Notification, NotificationSink, NotifyKind, NotifyPriority, UserDirectory,
};
pub use user::{ProjectMember, ProjectRole, User};
