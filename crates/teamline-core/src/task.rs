//! Task model — the approval-relevant subset of a Teamline task.
//!
//! The full task document (description, comments, attachments, ...) is
//! owned by the task CRUD layer; the approval core only reads and
//! mutates the fields below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task, as seen by the approval workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Human-readable title.
    pub title: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    /// Estimation, if the team estimates this task.
    pub story_points: Option<u32>,
    /// Current assignee.
    pub assignee_id: Option<String>,
    pub labels: Vec<String>,
    pub status: TaskStatus,
    /// Terminal approval outcome for the current review cycle.
    pub approval_status: Option<ApprovalStatus>,
    pub approval_config: ApprovalConfig,
    /// Append-only review history, oldest first.
    pub approval_requests: Vec<ApprovalRequest>,
    /// Instantiated from the policy's template when a rule first applies.
    pub checklist: Vec<ChecklistItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    PendingApproval,
    Done,
}

/// Terminal approval outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Status of one approval request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    AutoApproved,
    Bypassed,
}

/// Task type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Feature,
    Bug,
    Chore,
    Spike,
}

/// Task priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Approval bookkeeping stamped on a task when it enters review.
/// Timers are set once at submission and never recomputed afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Whether this task currently requires approval.
    pub required: bool,
    /// Rule that applied at submission time (None = global settings path).
    pub rule_id: Option<String>,
    pub rule_name: Option<String>,
    pub auto_approve: bool,
    pub auto_approve_at: Option<DateTime<Utc>>,
    pub escalate: bool,
    pub escalate_at: Option<DateTime<Utc>>,
    /// Escalation fires at most once per submission.
    pub escalation_notification_sent: bool,
    pub bypass_reason: Option<String>,
    pub bypassed_by: Option<String>,
}

/// One immutable record of a review cycle. Appended when a task enters
/// review; closed (decision fields filled) exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub requested_at: DateTime<Utc>,
    /// Users who may decide this request.
    pub approvers: Vec<String>,
    pub status: RequestStatus,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    /// Rejection/bypass reason.
    pub reason: Option<String>,
}

/// One checklist entry, copied from the project's template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub name: String,
    pub required: bool,
    pub checked: bool,
    pub checked_by: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl Task {
    /// Create a new task in the given project.
    pub fn new(project_id: &str, title: &str, task_type: TaskType, priority: TaskPriority) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            task_type,
            priority,
            story_points: None,
            assignee_id: None,
            labels: Vec::new(),
            status: TaskStatus::Todo,
            approval_status: None,
            approval_config: ApprovalConfig::default(),
            approval_requests: Vec::new(),
            checklist: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// True if every `required` checklist item is checked.
    /// Non-required items never block approval.
    pub fn required_checklist_done(&self) -> bool {
        self.checklist
            .iter()
            .filter(|i| i.required)
            .all(|i| i.checked)
    }

    /// Names of required items still unchecked.
    pub fn unchecked_required_items(&self) -> Vec<&str> {
        self.checklist
            .iter()
            .filter(|i| i.required && !i.checked)
            .map(|i| i.name.as_str())
            .collect()
    }

    /// The single open (PENDING) approval request, if any.
    pub fn open_request(&self) -> Option<&ApprovalRequest> {
        self.approval_requests
            .iter()
            .find(|r| r.status == RequestStatus::Pending)
    }

    /// The most recent approval request — always the one evaluated for state.
    pub fn latest_request(&self) -> Option<&ApprovalRequest> {
        self.approval_requests.last()
    }

    /// How many review cycles this task has been through beyond the first.
    pub fn revision_count(&self) -> usize {
        self.approval_requests.len().saturating_sub(1)
    }
}

impl ApprovalRequest {
    /// Open a new pending request for the given approvers.
    pub fn pending(approvers: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            requested_at: Utc::now(),
            approvers,
            status: RequestStatus::Pending,
            decided_by: None,
            decided_at: None,
            reason: None,
        }
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::PendingApproval => "pending_approval",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "pending_approval" => Self::PendingApproval,
            "done" => Self::Done,
            _ => Self::Todo,
        }
    }
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AutoApproved => "auto_approved",
            Self::Bypassed => "bypassed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "auto_approved" => Self::AutoApproved,
            "bypassed" => Self::Bypassed,
            _ => Self::Pending,
        }
    }
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Chore => "chore",
            Self::Spike => "spike",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "bug" => Self::Bug,
            "chore" => Self::Chore,
            "spike" => Self::Spike,
            _ => Self::Feature,
        }
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "high" => Self::High,
            "urgent" => Self::Urgent,
            _ => Self::Medium,
        }
    }
}
