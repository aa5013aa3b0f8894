//! Approval state machine — task transitions and decisions.
//!
//! Owns the store and the collaborator seams. All mutations that
//! resolve a pending approval go through conditional store updates, so
//! a sweep and a manual decision can never overwrite each other.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use teamline_core::error::{Result, TeamlineError};
use teamline_core::task::{
    ApprovalConfig, ApprovalRequest, ApprovalStatus, ChecklistItem, RequestStatus, Task,
    TaskStatus,
};
use teamline_core::traits::{
    MembershipProvider, Notification, NotificationSink, NotifyKind, NotifyPriority, UserDirectory,
};
use teamline_core::user::{ProjectRole, User};

use crate::matcher::match_rule;
use crate::resolver::{resolve_approvers, resolve_escalation, resolve_role_holders};
use crate::store::ApprovalDb;

/// The approval engine: policy application, manual decisions, and the
/// per-task sweep transitions.
pub struct ApprovalEngine {
    db: ApprovalDb,
    membership: Box<dyn MembershipProvider>,
    directory: Box<dyn UserDirectory>,
    notifier: Box<dyn NotificationSink>,
}

/// Result of submitting a task for approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SubmitOutcome {
    /// A pending request was opened and approvers were notified.
    Submitted {
        request_id: String,
        approvers: Vec<String>,
        auto_approve_at: Option<DateTime<Utc>>,
        escalate_at: Option<DateTime<Utc>>,
    },
    /// Task is already pending with an open request; nothing was changed.
    AlreadyPending,
    /// No policy, disabled policy, uncovered type, exempting rule, or a
    /// global path with nothing enabled. Not an error.
    NotRequired,
    /// Policy matched but resolved zero approvers; the requirement is
    /// void and the task proceeds unreviewed. Surfaced as a policy gap.
    NoApprovers,
}

/// Result of one auto-approval attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoApproveOutcome {
    Approved,
    /// Required checklist items unchecked — left pending, timer intact.
    SkippedChecklist,
    /// Deadline not reached (or no timer set).
    NotDue,
    /// No longer pending approval (already resolved, possibly mid-sweep).
    NotPending,
}

/// Result of one escalation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalateOutcome {
    Escalated { recipients: usize },
    AlreadySent,
    NotPending,
    /// Deadline not reached (or escalation not enabled for this task).
    NotDue,
    /// Marked as escalated, but nobody could be resolved to notify.
    NoRecipients,
}

/// Snapshot of a task's approval state for the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub task_id: String,
    pub status: TaskStatus,
    pub approval_status: Option<ApprovalStatus>,
    pub can_approve: bool,
    /// Why approval is blocked, when it is.
    pub blocked_reason: Option<String>,
    pub open_request_id: Option<String>,
    pub approvers: Vec<String>,
    pub revision_count: usize,
    pub auto_approve_at: Option<DateTime<Utc>>,
    pub escalate_at: Option<DateTime<Utc>>,
    pub escalation_notification_sent: bool,
}

/// Whitelisted checklist item mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecklistItemUpdate {
    pub checked: Option<bool>,
    pub checked_by: Option<String>,
    pub note: Option<String>,
}

/// Can the task be manually approved right now? Returns the blocking
/// reason otherwise. Non-required checklist items never block.
pub fn can_approve(task: &Task) -> std::result::Result<(), String> {
    if task.status != TaskStatus::PendingApproval {
        return Err(format!(
            "task is not pending approval (status: {})",
            task.status.as_str()
        ));
    }
    let unchecked = task.unchecked_required_items();
    if !unchecked.is_empty() {
        return Err(format!(
            "required checklist items unchecked: {}",
            unchecked.join(", ")
        ));
    }
    Ok(())
}

impl ApprovalEngine {
    pub fn new(
        db: ApprovalDb,
        membership: Box<dyn MembershipProvider>,
        directory: Box<dyn UserDirectory>,
        notifier: Box<dyn NotificationSink>,
    ) -> Self {
        Self { db, membership, directory, notifier }
    }

    /// The underlying store (policy CRUD, sweep queries).
    pub fn db(&self) -> &ApprovalDb {
        &self.db
    }

    // ─── Apply-policy transition ───────────────────────────────

    /// Task submission hook: apply the project's approval policy.
    ///
    /// Idempotent — calling it again on a task already pending with an
    /// open request changes nothing.
    pub fn submit(&self, task_id: &str) -> Result<SubmitOutcome> {
        let mut task = self.load_task(task_id)?;
        if task.status == TaskStatus::PendingApproval && task.open_request().is_some() {
            return Ok(SubmitOutcome::AlreadyPending);
        }

        let Some(policy) = self.db.load_policy(&task.project_id)? else {
            tracing::debug!("No approval policy for project {}", task.project_id);
            return Ok(SubmitOutcome::NotRequired);
        };
        if !policy.enabled || !policy.covers(task.task_type) {
            return Ok(SubmitOutcome::NotRequired);
        }

        // Rule path, or the policy's global-settings fallback
        let rule = match_rule(&policy, &task);
        let (approvers, config) = match rule {
            Some(rule) => {
                if !rule.actions.require_approval {
                    // First-match semantics: an exempting rule wins.
                    return Ok(SubmitOutcome::NotRequired);
                }
                let approvers = resolve_approvers(
                    &rule.actions.approvers,
                    &task.project_id,
                    self.membership.as_ref(),
                    self.directory.as_ref(),
                )?;
                let config = PathConfig {
                    rule_id: Some(rule.id.clone()),
                    rule_name: Some(rule.name.clone()),
                    auto_approve: rule.actions.auto_approve,
                    auto_approve_after_hours: rule.actions.auto_approve_after_hours,
                    escalate: rule.actions.escalate,
                    escalate_after_hours: rule.actions.escalate_after_hours,
                };
                (approvers, config)
            }
            None => {
                // Global settings only apply when at least one of them
                // is actually enabled; otherwise approval is not
                // required at all for this task.
                if !policy.auto_approve_enabled && !policy.escalation_enabled {
                    return Ok(SubmitOutcome::NotRequired);
                }
                let approvers = resolve_role_holders(
                    ProjectRole::TeamLead,
                    &task.project_id,
                    self.membership.as_ref(),
                    self.directory.as_ref(),
                )?;
                let config = PathConfig {
                    rule_id: None,
                    rule_name: None,
                    auto_approve: policy.auto_approve_enabled,
                    auto_approve_after_hours: policy.auto_approve_after_hours,
                    escalate: policy.escalation_enabled,
                    escalate_after_hours: policy.escalation_after_hours,
                };
                (approvers, config)
            }
        };

        if approvers.is_empty() {
            tracing::warn!(
                "⚠️ No approvers configured for task {} in project {} (rule: {})",
                task.id,
                task.project_id,
                config.rule_name.as_deref().unwrap_or("global settings")
            );
            self.report_policy_gap(&task);
            return Ok(SubmitOutcome::NoApprovers);
        }

        let now = Utc::now();
        if task.checklist.is_empty() {
            task.checklist = policy
                .template(task.task_type)
                .iter()
                .map(|t| ChecklistItem {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: t.name.clone(),
                    required: t.required,
                    checked: false,
                    checked_by: None,
                    checked_at: None,
                    note: None,
                })
                .collect();
        }

        let approver_ids: Vec<String> = approvers.iter().map(|u| u.id.clone()).collect();
        let request = ApprovalRequest::pending(approver_ids.clone());
        let request_id = request.id.clone();

        task.status = TaskStatus::PendingApproval;
        task.approval_status = Some(ApprovalStatus::Pending);
        task.approval_config = ApprovalConfig {
            required: true,
            rule_id: config.rule_id,
            rule_name: config.rule_name,
            auto_approve: config.auto_approve,
            auto_approve_at: config
                .auto_approve
                .then(|| now + Duration::hours(config.auto_approve_after_hours as i64)),
            escalate: config.escalate,
            escalate_at: config
                .escalate
                .then(|| now + Duration::hours(config.escalate_after_hours as i64)),
            escalation_notification_sent: false,
            bypass_reason: None,
            bypassed_by: None,
        };
        task.approval_requests.push(request);
        task.updated_at = now;
        self.db.save_task(&task)?;

        tracing::info!(
            "📋 Task '{}' pending approval ({} approver(s), rule: {})",
            task.title,
            approver_ids.len(),
            task.approval_config.rule_name.as_deref().unwrap_or("global settings")
        );
        self.notify_each(
            &approvers,
            NotifyKind::ApprovalRequested,
            "Approval requested",
            &format!("Task '{}' needs your review", task.title),
            &task,
            NotifyPriority::High,
        );

        Ok(SubmitOutcome::Submitted {
            request_id,
            approvers: approver_ids,
            auto_approve_at: task.approval_config.auto_approve_at,
            escalate_at: task.approval_config.escalate_at,
        })
    }

    // ─── Manual decisions ──────────────────────────────────────

    /// Approve the open request and complete the task.
    pub fn approve(&self, task_id: &str, actor: &str) -> Result<Task> {
        let mut task = self.load_task(task_id)?;
        can_approve(&task).map_err(TeamlineError::precondition)?;

        let now = Utc::now();
        task.status = TaskStatus::Done;
        task.approval_status = Some(ApprovalStatus::Approved);
        task.completed_at = Some(now);
        task.updated_at = now;
        close_open_request(&mut task, RequestStatus::Approved, actor, None, now);

        if !self.db.update_task_if_pending(&task)? {
            return Err(TeamlineError::precondition(
                "task was resolved by someone else; refresh and retry",
            ));
        }
        tracing::info!("✅ Task '{}' approved by {actor}", task.title);
        Ok(task)
    }

    /// Reject the open request and return the task to an editable
    /// status so the assignee can revise and resubmit. Resubmission
    /// appends a new request; this one stays in history.
    pub fn reject(&self, task_id: &str, actor: &str, reason: &str) -> Result<Task> {
        let mut task = self.load_task(task_id)?;
        if task.status != TaskStatus::PendingApproval {
            return Err(TeamlineError::precondition(format!(
                "task is not pending approval (status: {})",
                task.status.as_str()
            )));
        }

        let now = Utc::now();
        task.status = TaskStatus::InProgress;
        task.approval_status = Some(ApprovalStatus::Rejected);
        task.updated_at = now;
        close_open_request(&mut task, RequestStatus::Rejected, actor, Some(reason), now);

        if !self.db.update_task_if_pending(&task)? {
            return Err(TeamlineError::precondition(
                "task was resolved by someone else; refresh and retry",
            ));
        }
        tracing::info!("❌ Task '{}' rejected by {actor}: {reason}", task.title);
        Ok(task)
    }

    /// Bypass the review entirely (reason + actor recorded). Skips the
    /// checklist gate — bypass is the escape hatch for stuck reviews.
    pub fn bypass(&self, task_id: &str, actor: &str, reason: &str) -> Result<Task> {
        let mut task = self.load_task(task_id)?;
        if task.status != TaskStatus::PendingApproval {
            return Err(TeamlineError::precondition(format!(
                "task is not pending approval (status: {})",
                task.status.as_str()
            )));
        }

        let now = Utc::now();
        task.status = TaskStatus::Done;
        task.approval_status = Some(ApprovalStatus::Approved);
        task.completed_at = Some(now);
        task.updated_at = now;
        task.approval_config.bypass_reason = Some(reason.to_string());
        task.approval_config.bypassed_by = Some(actor.to_string());
        close_open_request(&mut task, RequestStatus::Bypassed, actor, Some(reason), now);

        if !self.db.update_task_if_pending(&task)? {
            return Err(TeamlineError::precondition(
                "task was resolved by someone else; refresh and retry",
            ));
        }
        tracing::warn!("⏭️ Task '{}' approval bypassed by {actor}: {reason}", task.title);
        Ok(task)
    }

    /// Mutate one checklist item by id.
    pub fn update_checklist_item(
        &self,
        task_id: &str,
        item_id: &str,
        update: &ChecklistItemUpdate,
    ) -> Result<Task> {
        let mut task = self.load_task(task_id)?;
        let now = Utc::now();
        let item = task
            .checklist
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| TeamlineError::not_found(format!("checklist item {item_id}")))?;

        if let Some(checked) = update.checked {
            item.checked = checked;
            if checked {
                item.checked_at = Some(now);
                item.checked_by = update.checked_by.clone();
            } else {
                item.checked_at = None;
                item.checked_by = None;
            }
        }
        if let Some(note) = &update.note {
            item.note = Some(note.clone());
        }
        task.updated_at = now;
        self.db.save_task(&task)?;
        Ok(task)
    }

    /// Approval snapshot for the UI.
    pub fn status_info(&self, task_id: &str) -> Result<StatusInfo> {
        let task = self.load_task(task_id)?;
        let (allowed, reason) = match can_approve(&task) {
            Ok(()) => (true, None),
            Err(reason) => (false, Some(reason)),
        };
        let open = task.open_request();
        Ok(StatusInfo {
            task_id: task.id.clone(),
            status: task.status,
            approval_status: task.approval_status,
            can_approve: allowed,
            blocked_reason: reason,
            open_request_id: open.map(|r| r.id.clone()),
            approvers: open.map(|r| r.approvers.clone()).unwrap_or_default(),
            revision_count: task.revision_count(),
            auto_approve_at: task.approval_config.auto_approve_at,
            escalate_at: task.approval_config.escalate_at,
            escalation_notification_sent: task.approval_config.escalation_notification_sent,
        })
    }

    // ─── Sweep transitions (one task at a time) ────────────────

    /// Auto-approve a task whose deadline has passed, gated on the
    /// required checklist. A skipped task keeps its timer and is
    /// re-evaluated on the next tick.
    pub fn try_auto_approve(&self, task_id: &str) -> Result<AutoApproveOutcome> {
        let mut task = self.load_task(task_id)?;
        if task.status != TaskStatus::PendingApproval {
            return Ok(AutoApproveOutcome::NotPending);
        }
        let now = Utc::now();
        let due = task.approval_config.auto_approve
            && task.approval_config.auto_approve_at.is_some_and(|at| at <= now);
        if !due {
            return Ok(AutoApproveOutcome::NotDue);
        }
        if !task.required_checklist_done() {
            tracing::debug!(
                "Auto-approve skipped for '{}': required checklist incomplete",
                task.title
            );
            return Ok(AutoApproveOutcome::SkippedChecklist);
        }

        task.status = TaskStatus::Done;
        task.approval_status = Some(ApprovalStatus::Approved);
        task.completed_at = Some(now);
        task.updated_at = now;
        if let Some(req) = task
            .approval_requests
            .iter_mut()
            .rev()
            .find(|r| r.status == RequestStatus::Pending)
        {
            req.status = RequestStatus::AutoApproved;
            req.decided_at = Some(now);
        }

        // Conditional write: lose gracefully to a concurrent decision
        if !self.db.update_task_if_pending(&task)? {
            return Ok(AutoApproveOutcome::NotPending);
        }
        tracing::info!("⏲️ Task '{}' auto-approved after deadline", task.title);

        let mut recipient_ids: Vec<String> = Vec::new();
        if let Some(assignee) = &task.assignee_id {
            recipient_ids.push(assignee.clone());
        }
        if let Some(req) = task.latest_request() {
            for id in &req.approvers {
                if !recipient_ids.contains(id) {
                    recipient_ids.push(id.clone());
                }
            }
        }
        let recipients = self.directory.find_users(&recipient_ids)?;
        self.notify_each(
            &recipients,
            NotifyKind::AutoApproved,
            "Task auto-approved",
            &format!("Task '{}' was auto-approved after its review deadline", task.title),
            &task,
            NotifyPriority::Normal,
        );
        Ok(AutoApproveOutcome::Approved)
    }

    /// Escalate an overdue pending approval: notify the secondary
    /// audience, at most once per submission. The rule is re-matched at
    /// escalation time because the policy may have changed.
    pub fn try_escalate(&self, task_id: &str) -> Result<EscalateOutcome> {
        let task = self.load_task(task_id)?;
        if task.status != TaskStatus::PendingApproval {
            return Ok(EscalateOutcome::NotPending);
        }
        if task.approval_config.escalation_notification_sent {
            return Ok(EscalateOutcome::AlreadySent);
        }
        let due = task.approval_config.escalate
            && task.approval_config.escalate_at.is_some_and(|at| at <= Utc::now());
        if !due {
            return Ok(EscalateOutcome::NotDue);
        }

        let policy = self.db.load_policy(&task.project_id)?;
        let mut recipients: Vec<User> = Vec::new();
        if let Some(policy) = &policy
            && let Some(rule) = match_rule(policy, &task)
            && !rule.actions.escalate_to.is_empty()
        {
            recipients = resolve_escalation(
                &rule.actions.escalate_to,
                &task.project_id,
                self.membership.as_ref(),
                self.directory.as_ref(),
            )?;
        }
        if recipients.is_empty() {
            recipients = resolve_role_holders(
                ProjectRole::ProjectManager,
                &task.project_id,
                self.membership.as_ref(),
                self.directory.as_ref(),
            )?;
        }

        // Claim the one-shot flag before delivering, so two ticks can
        // never both send.
        if !self.db.mark_escalated_if_unsent(&task.id)? {
            return Ok(EscalateOutcome::AlreadySent);
        }
        if recipients.is_empty() {
            tracing::warn!(
                "⚠️ Escalation for task '{}' resolved no recipients (project {})",
                task.title,
                task.project_id
            );
            return Ok(EscalateOutcome::NoRecipients);
        }

        tracing::info!(
            "⏫ Escalating task '{}' to {} recipient(s)",
            task.title,
            recipients.len()
        );
        self.notify_each(
            &recipients,
            NotifyKind::Escalation,
            "Approval overdue",
            &format!(
                "Task '{}' has been waiting for approval past its deadline",
                task.title
            ),
            &task,
            NotifyPriority::Urgent,
        );
        Ok(EscalateOutcome::Escalated { recipients: recipients.len() })
    }

    // ─── Internals ─────────────────────────────────────────────

    fn load_task(&self, task_id: &str) -> Result<Task> {
        self.db
            .load_task(task_id)?
            .ok_or_else(|| TeamlineError::not_found(format!("task {task_id}")))
    }

    /// Best-effort delivery: dispatch failures are logged, never fatal.
    fn notify_each(
        &self,
        recipients: &[User],
        kind: NotifyKind,
        title: &str,
        message: &str,
        task: &Task,
        priority: NotifyPriority,
    ) {
        for user in recipients {
            let n = Notification::new(
                &user.id,
                kind,
                title,
                message,
                Some(&task.id),
                &task.project_id,
                priority,
            );
            if let Err(e) = self.notifier.notify(&n) {
                tracing::warn!("⚠️ Notification dispatch failed for {}: {e}", user.id);
            }
        }
    }

    /// A matched policy with zero resolvable reviewers is a policy gap,
    /// not success: warn a team lead when one exists.
    fn report_policy_gap(&self, task: &Task) {
        let leads = resolve_role_holders(
            ProjectRole::TeamLead,
            &task.project_id,
            self.membership.as_ref(),
            self.directory.as_ref(),
        )
        .unwrap_or_default();
        if let Some(lead) = leads.first() {
            let n = Notification::new(
                &lead.id,
                NotifyKind::PolicyGap,
                "Approval policy gap",
                &format!(
                    "Task '{}' required approval but no approvers could be resolved",
                    task.title
                ),
                Some(&task.id),
                &task.project_id,
                NotifyPriority::High,
            );
            if let Err(e) = self.notifier.notify(&n) {
                tracing::warn!("⚠️ Policy-gap notification failed: {e}");
            }
        }
    }
}

struct PathConfig {
    rule_id: Option<String>,
    rule_name: Option<String>,
    auto_approve: bool,
    auto_approve_after_hours: u32,
    escalate: bool,
    escalate_after_hours: u32,
}

fn close_open_request(
    task: &mut Task,
    status: RequestStatus,
    actor: &str,
    reason: Option<&str>,
    now: DateTime<Utc>,
) {
    if let Some(req) = task
        .approval_requests
        .iter_mut()
        .rev()
        .find(|r| r.status == RequestStatus::Pending)
    {
        req.status = status;
        req.decided_by = Some(actor.to_string());
        req.decided_at = Some(now);
        req.reason = reason.map(|r| r.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryDirectory, InMemoryMembership, RecordingSink};
    use crate::policy::{
        ApproverSpec, ChecklistTemplateItem, PolicyUpdate, RuleActions, RuleConditions,
    };
    use std::sync::Arc;
    use teamline_core::task::{TaskPriority, TaskType};

    struct Fixture {
        engine: ApprovalEngine,
        sink: Arc<RecordingSink>,
    }

    /// Engine over an in-memory store with a small project team.
    fn fixture() -> Fixture {
        let db = ApprovalDb::open_in_memory().unwrap();

        let mut members = InMemoryMembership::new();
        members.add("p1", "lead-1", ProjectRole::TeamLead);
        members.add("p1", "pm-1", ProjectRole::ProjectManager);
        members.add("p1", "dev-1", ProjectRole::Member);

        let mut users = InMemoryDirectory::new();
        for id in ["lead-1", "pm-1", "dev-1"] {
            users.add(id, &format!("{id}@teamline.dev"));
        }

        let sink = Arc::new(RecordingSink::new());

        struct SharedSink(Arc<RecordingSink>);
        impl NotificationSink for SharedSink {
            fn notify(&self, n: &Notification) -> Result<()> {
                self.0.notify(n)
            }
        }

        Fixture {
            engine: ApprovalEngine::new(
                db,
                Box::new(members),
                Box::new(users),
                Box::new(SharedSink(sink.clone())),
            ),
            sink,
        }
    }

    fn feature_task(f: &Fixture) -> Task {
        let mut task = Task::new("p1", "Ship search", TaskType::Feature, TaskPriority::High);
        task.assignee_id = Some("dev-1".into());
        task.status = TaskStatus::InProgress;
        f.engine.db().save_task(&task).unwrap();
        task
    }

    /// Enabled policy covering features, with one lead-reviewed rule.
    fn standard_policy(f: &Fixture) {
        f.engine
            .db()
            .update_policy(
                "p1",
                &PolicyUpdate {
                    enabled: Some(true),
                    require_approval_for: Some(vec![TaskType::Feature]),
                    ..Default::default()
                },
            )
            .unwrap();
        f.engine
            .db()
            .add_rule(
                "p1",
                "high features need lead review",
                1,
                RuleConditions { priorities: vec![TaskPriority::High], ..Default::default() },
                RuleActions {
                    require_approval: true,
                    approvers: ApproverSpec {
                        roles: vec![ProjectRole::TeamLead],
                        ..Default::default()
                    },
                    auto_approve: true,
                    auto_approve_after_hours: 24,
                    escalate: true,
                    escalate_after_hours: 48,
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_submit_without_policy_not_required() {
        let f = fixture();
        let task = feature_task(&f);
        assert_eq!(f.engine.submit(&task.id).unwrap(), SubmitOutcome::NotRequired);
        // Plain reads never create a policy
        assert!(f.engine.db().load_policy("p1").unwrap().is_none());
    }

    #[test]
    fn test_submit_uncovered_type_not_required() {
        let f = fixture();
        standard_policy(&f);
        let mut task = Task::new("p1", "Cleanup", TaskType::Chore, TaskPriority::High);
        task.status = TaskStatus::InProgress;
        f.engine.db().save_task(&task).unwrap();
        assert_eq!(f.engine.submit(&task.id).unwrap(), SubmitOutcome::NotRequired);
    }

    #[test]
    fn test_submit_rule_path_opens_request() {
        let f = fixture();
        standard_policy(&f);
        f.engine
            .db()
            .set_checklist_template(
                "p1",
                TaskType::Feature,
                vec![ChecklistTemplateItem { name: "Code reviewed".into(), required: true }],
            )
            .unwrap();
        let task = feature_task(&f);

        let outcome = f.engine.submit(&task.id).unwrap();
        let SubmitOutcome::Submitted { approvers, auto_approve_at, escalate_at, .. } = outcome
        else {
            panic!("expected Submitted, got {outcome:?}");
        };
        assert_eq!(approvers, vec!["lead-1".to_string()]);

        let stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::PendingApproval);
        assert_eq!(stored.approval_status, Some(ApprovalStatus::Pending));
        assert_eq!(stored.checklist.len(), 1);
        assert_eq!(stored.approval_requests.len(), 1);
        assert!(stored.approval_config.required);

        // Timers stamped from "now" + rule hours
        let expected = Utc::now() + Duration::hours(24);
        let at = auto_approve_at.unwrap();
        assert!((expected - at).num_seconds().abs() < 5);
        assert!(escalate_at.is_some());

        // One notification per approver
        assert_eq!(f.sink.count(), 1);
        assert_eq!(f.sink.sent()[0].kind, NotifyKind::ApprovalRequested);
    }

    #[test]
    fn test_submit_idempotent() {
        let f = fixture();
        standard_policy(&f);
        let task = feature_task(&f);
        f.engine.submit(&task.id).unwrap();
        assert_eq!(f.engine.submit(&task.id).unwrap(), SubmitOutcome::AlreadyPending);
        let stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.approval_requests.len(), 1);
    }

    #[test]
    fn test_submit_no_approvers_is_policy_gap() {
        let f = fixture();
        standard_policy(&f);
        // Rule whose approver spec targets a user that does not exist
        f.engine
            .db()
            .update_rule(
                "p1",
                &f.engine.db().load_policy("p1").unwrap().unwrap().rules[0].id.clone(),
                &crate::policy::RuleUpdate {
                    actions: Some(RuleActions {
                        require_approval: true,
                        approvers: ApproverSpec {
                            specific_users: vec!["ghost".into()],
                            ..Default::default()
                        },
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        let task = feature_task(&f);

        assert_eq!(f.engine.submit(&task.id).unwrap(), SubmitOutcome::NoApprovers);
        // Task untouched — the requirement is void
        let stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::InProgress);
        assert!(stored.approval_requests.is_empty());
        // But the gap was reported to a team lead
        let sent = f.sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotifyKind::PolicyGap);
        assert_eq!(sent[0].recipient_id, "lead-1");
    }

    #[test]
    fn test_global_fallback_path_uses_team_leads() {
        let f = fixture();
        f.engine
            .db()
            .update_policy(
                "p1",
                &PolicyUpdate {
                    enabled: Some(true),
                    require_approval_for: Some(vec![TaskType::Feature]),
                    auto_approve_enabled: Some(true),
                    auto_approve_after_hours: Some(12),
                    ..Default::default()
                },
            )
            .unwrap();
        let task = feature_task(&f);

        let SubmitOutcome::Submitted { approvers, .. } = f.engine.submit(&task.id).unwrap()
        else {
            panic!("expected Submitted");
        };
        assert_eq!(approvers, vec!["lead-1".to_string()]);
        let stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert!(stored.approval_config.rule_id.is_none());
        assert!(stored.approval_config.auto_approve);
        assert!(!stored.approval_config.escalate);
    }

    #[test]
    fn test_global_path_disabled_not_required() {
        // Scenario C: covered type, no matching rule, global settings
        // all disabled → no PENDING request at all.
        let f = fixture();
        f.engine
            .db()
            .update_policy(
                "p1",
                &PolicyUpdate {
                    enabled: Some(true),
                    require_approval_for: Some(vec![TaskType::Feature]),
                    auto_approve_enabled: Some(false),
                    escalation_enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut task = Task::new("p1", "Small tweak", TaskType::Feature, TaskPriority::Low);
        task.status = TaskStatus::InProgress;
        f.engine.db().save_task(&task).unwrap();

        assert_eq!(f.engine.submit(&task.id).unwrap(), SubmitOutcome::NotRequired);
        let stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert!(stored.approval_requests.is_empty());
        assert_eq!(f.sink.count(), 0);
    }

    #[test]
    fn test_approve_blocked_by_required_checklist() {
        let f = fixture();
        standard_policy(&f);
        f.engine
            .db()
            .set_checklist_template(
                "p1",
                TaskType::Feature,
                vec![ChecklistTemplateItem { name: "QA sign-off".into(), required: true }],
            )
            .unwrap();
        let task = feature_task(&f);
        f.engine.submit(&task.id).unwrap();

        let err = f.engine.approve(&task.id, "lead-1").unwrap_err();
        assert!(matches!(err, TeamlineError::Precondition(_)));
        assert!(err.to_string().contains("QA sign-off"));

        // Check the item, approve succeeds and closes the request
        let stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        let item_id = stored.checklist[0].id.clone();
        f.engine
            .update_checklist_item(
                &task.id,
                &item_id,
                &ChecklistItemUpdate {
                    checked: Some(true),
                    checked_by: Some("dev-1".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let approved = f.engine.approve(&task.id, "lead-1").unwrap();
        assert_eq!(approved.status, TaskStatus::Done);
        assert_eq!(approved.approval_status, Some(ApprovalStatus::Approved));
        assert!(approved.completed_at.is_some());
        let req = approved.latest_request().unwrap();
        assert_eq!(req.status, RequestStatus::Approved);
        assert_eq!(req.decided_by.as_deref(), Some("lead-1"));
    }

    #[test]
    fn test_reject_then_resubmit_grows_history() {
        let f = fixture();
        standard_policy(&f);
        let task = feature_task(&f);
        f.engine.submit(&task.id).unwrap();

        let rejected = f.engine.reject(&task.id, "lead-1", "needs tests").unwrap();
        assert_eq!(rejected.status, TaskStatus::InProgress);
        assert_eq!(rejected.approval_status, Some(ApprovalStatus::Rejected));
        assert_eq!(rejected.latest_request().unwrap().reason.as_deref(), Some("needs tests"));

        // Resubmission appends a new request; the old one stays
        f.engine.submit(&task.id).unwrap();
        let stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.approval_requests.len(), 2);
        assert_eq!(stored.revision_count(), 1);
        assert_eq!(stored.approval_requests[0].status, RequestStatus::Rejected);
        assert_eq!(stored.approval_requests[1].status, RequestStatus::Pending);
    }

    #[test]
    fn test_bypass_records_actor_and_reason() {
        let f = fixture();
        standard_policy(&f);
        f.engine
            .db()
            .set_checklist_template(
                "p1",
                TaskType::Feature,
                vec![ChecklistTemplateItem { name: "QA sign-off".into(), required: true }],
            )
            .unwrap();
        let task = feature_task(&f);
        f.engine.submit(&task.id).unwrap();

        // Bypass skips the checklist gate
        let bypassed = f.engine.bypass(&task.id, "pm-1", "hotfix window").unwrap();
        assert_eq!(bypassed.status, TaskStatus::Done);
        assert_eq!(bypassed.approval_config.bypassed_by.as_deref(), Some("pm-1"));
        assert_eq!(bypassed.approval_config.bypass_reason.as_deref(), Some("hotfix window"));
        assert_eq!(bypassed.latest_request().unwrap().status, RequestStatus::Bypassed);
    }

    #[test]
    fn test_decision_on_non_pending_task_rejected() {
        let f = fixture();
        let task = feature_task(&f);
        assert!(matches!(
            f.engine.approve(&task.id, "lead-1"),
            Err(TeamlineError::Precondition(_))
        ));
        assert!(matches!(
            f.engine.reject(&task.id, "lead-1", "nope"),
            Err(TeamlineError::Precondition(_))
        ));
    }

    #[test]
    fn test_unknown_checklist_item() {
        let f = fixture();
        let task = feature_task(&f);
        let err = f
            .engine
            .update_checklist_item(&task.id, "nope", &ChecklistItemUpdate::default())
            .unwrap_err();
        assert!(matches!(err, TeamlineError::NotFound(_)));
    }

    #[test]
    fn test_status_info_reflects_blocking() {
        let f = fixture();
        standard_policy(&f);
        f.engine
            .db()
            .set_checklist_template(
                "p1",
                TaskType::Feature,
                vec![ChecklistTemplateItem { name: "QA sign-off".into(), required: true }],
            )
            .unwrap();
        let task = feature_task(&f);
        f.engine.submit(&task.id).unwrap();

        let info = f.engine.status_info(&task.id).unwrap();
        assert_eq!(info.status, TaskStatus::PendingApproval);
        assert!(!info.can_approve);
        assert!(info.blocked_reason.unwrap().contains("QA sign-off"));
        assert_eq!(info.approvers, vec!["lead-1".to_string()]);
        assert!(info.open_request_id.is_some());
    }

    #[test]
    fn test_try_auto_approve_gates() {
        let f = fixture();
        standard_policy(&f);
        f.engine
            .db()
            .set_checklist_template(
                "p1",
                TaskType::Feature,
                vec![ChecklistTemplateItem { name: "QA sign-off".into(), required: true }],
            )
            .unwrap();
        let task = feature_task(&f);
        f.engine.submit(&task.id).unwrap();

        // Deadline in the future → not due
        assert_eq!(f.engine.try_auto_approve(&task.id).unwrap(), AutoApproveOutcome::NotDue);

        // Force the deadline into the past; checklist still blocks
        let mut stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        stored.approval_config.auto_approve_at = Some(Utc::now() - Duration::hours(1));
        f.engine.db().save_task(&stored).unwrap();
        assert_eq!(
            f.engine.try_auto_approve(&task.id).unwrap(),
            AutoApproveOutcome::SkippedChecklist
        );
        // Timer untouched — re-evaluated next tick
        let still = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert!(still.approval_config.auto_approve_at.is_some());
        assert_eq!(still.status, TaskStatus::PendingApproval);

        // Complete the checklist → approved
        let item_id = still.checklist[0].id.clone();
        f.engine
            .update_checklist_item(
                &task.id,
                &item_id,
                &ChecklistItemUpdate { checked: Some(true), ..Default::default() },
            )
            .unwrap();
        assert_eq!(f.engine.try_auto_approve(&task.id).unwrap(), AutoApproveOutcome::Approved);

        let done = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.latest_request().unwrap().status, RequestStatus::AutoApproved);

        // Running again is a no-op
        assert_eq!(f.engine.try_auto_approve(&task.id).unwrap(), AutoApproveOutcome::NotPending);
    }

    #[test]
    fn test_try_escalate_once_with_rule_audience() {
        let f = fixture();
        standard_policy(&f);
        // Point the rule's escalation target at the PM explicitly
        let rule_id = f.engine.db().load_policy("p1").unwrap().unwrap().rules[0].id.clone();
        f.engine
            .db()
            .update_rule(
                "p1",
                &rule_id,
                &crate::policy::RuleUpdate {
                    actions: Some(RuleActions {
                        require_approval: true,
                        approvers: ApproverSpec {
                            roles: vec![ProjectRole::TeamLead],
                            ..Default::default()
                        },
                        escalate: true,
                        escalate_after_hours: 48,
                        escalate_to: crate::policy::EscalationTarget {
                            specific_users: vec!["pm-1".into()],
                            ..Default::default()
                        },
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        let task = feature_task(&f);
        f.engine.submit(&task.id).unwrap();
        let before = f.sink.count();

        // Force the escalation deadline into the past
        let mut stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        stored.approval_config.escalate_at = Some(Utc::now() - Duration::hours(1));
        f.engine.db().save_task(&stored).unwrap();

        assert_eq!(
            f.engine.try_escalate(&task.id).unwrap(),
            EscalateOutcome::Escalated { recipients: 1 }
        );
        let sent = f.sink.sent();
        assert_eq!(sent.len(), before + 1);
        assert_eq!(sent[before].kind, NotifyKind::Escalation);
        assert_eq!(sent[before].recipient_id, "pm-1");

        // Second attempt: at most once per submission
        assert_eq!(f.engine.try_escalate(&task.id).unwrap(), EscalateOutcome::AlreadySent);
        assert_eq!(f.sink.count(), before + 1);
    }

    #[test]
    fn test_escalate_before_deadline_is_not_due() {
        let f = fixture();
        standard_policy(&f); // escalate_after_hours: 48
        let task = feature_task(&f);
        f.engine.submit(&task.id).unwrap();
        let before = f.sink.count();

        let stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert!(stored.approval_config.escalate_at.unwrap() > Utc::now());

        // Deadline in the future: nothing sent, one-shot flag untouched
        assert_eq!(f.engine.try_escalate(&task.id).unwrap(), EscalateOutcome::NotDue);
        assert_eq!(f.sink.count(), before);
        let stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        assert!(!stored.approval_config.escalation_notification_sent);

        // Past the deadline the same task still escalates
        let mut stored = stored;
        stored.approval_config.escalate_at = Some(Utc::now() - Duration::hours(1));
        f.engine.db().save_task(&stored).unwrap();
        assert_eq!(
            f.engine.try_escalate(&task.id).unwrap(),
            EscalateOutcome::Escalated { recipients: 1 }
        );
    }

    #[test]
    fn test_escalate_falls_back_to_project_manager() {
        let f = fixture();
        standard_policy(&f); // rule has an empty escalate_to
        let task = feature_task(&f);
        f.engine.submit(&task.id).unwrap();
        let before = f.sink.count();

        let mut stored = f.engine.db().load_task(&task.id).unwrap().unwrap();
        stored.approval_config.escalate_at = Some(Utc::now() - Duration::hours(1));
        f.engine.db().save_task(&stored).unwrap();

        assert_eq!(
            f.engine.try_escalate(&task.id).unwrap(),
            EscalateOutcome::Escalated { recipients: 1 }
        );
        assert_eq!(f.sink.sent()[before].recipient_id, "pm-1");
    }
}
