//! Collaborator seams — what the surrounding product must provide.
//!
//! Membership, user lookup, and notification delivery are owned by the
//! main Teamline application; the approval core consumes them through
//! these traits. Delivery is fire-and-forget: a sink failure is logged
//! by the caller and never aborts a state transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::user::{ProjectMember, User};

/// Project membership lookups.
pub trait MembershipProvider: Send + Sync {
    /// All members of a project, with their roles.
    fn list_members(&self, project_id: &str) -> Result<Vec<ProjectMember>>;

    /// One member's role in a project, if they belong to it.
    fn find_member(&self, user_id: &str, project_id: &str) -> Result<Option<ProjectMember>>;
}

/// User directory lookups.
pub trait UserDirectory: Send + Sync {
    /// Resolve ids to users. Unknown ids are silently dropped.
    fn find_users(&self, ids: &[String]) -> Result<Vec<User>>;
}

/// Delivers user-facing notifications. No delivery guarantee is assumed.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// A user-facing message produced by the approval core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: String,
    pub kind: NotifyKind,
    pub title: String,
    pub message: String,
    pub task_id: Option<String>,
    pub project_id: String,
    pub priority: NotifyPriority,
    pub created_at: DateTime<Utc>,
}

/// What triggered the notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    /// You were asked to review a task.
    ApprovalRequested,
    /// A task you were involved with was auto-approved.
    AutoApproved,
    /// A pending approval exceeded its escalation deadline.
    Escalation,
    /// Policy matched but resolved zero approvers.
    PolicyGap,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Notification {
    /// Create a notification addressed to one recipient.
    pub fn new(
        recipient_id: &str,
        kind: NotifyKind,
        title: &str,
        message: &str,
        task_id: Option<&str>,
        project_id: &str,
        priority: NotifyPriority,
    ) -> Self {
        Self {
            recipient_id: recipient_id.to_string(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            task_id: task_id.map(|s| s.to_string()),
            project_id: project_id.to_string(),
            priority,
            created_at: Utc::now(),
        }
    }
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequested => "approval_requested",
            Self::AutoApproved => "auto_approved",
            Self::Escalation => "escalation",
            Self::PolicyGap => "policy_gap",
        }
    }
}

impl NotifyPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}
