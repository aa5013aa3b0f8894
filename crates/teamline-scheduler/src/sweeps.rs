//! The two approval sweeps and their tokio loops.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use teamline_approval::engine::{ApprovalEngine, AutoApproveOutcome, EscalateOutcome};
use teamline_core::config::ApprovalSweepConfig;
use teamline_core::error::Result;

/// Runs sweeps against a shared engine.
#[derive(Clone)]
pub struct Sweeper {
    engine: Arc<Mutex<ApprovalEngine>>,
}

/// Outcome tally of one auto-approval sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApproveSummary {
    /// Candidates the store query returned.
    pub examined: usize,
    pub approved: usize,
    /// Left pending: checklist incomplete, or resolved concurrently.
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome tally of one escalation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSummary {
    pub examined: usize,
    pub escalated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Sweeper {
    pub fn new(engine: Arc<Mutex<ApprovalEngine>>) -> Self {
        Self { engine }
    }

    /// One pass over due auto-approvals. A task that fails is counted
    /// and logged; the sweep always finishes.
    pub async fn run_auto_approval_sweep(&self) -> Result<AutoApproveSummary> {
        let engine = self.engine.lock().await;
        let due = engine.db().due_auto_approvals(Utc::now())?;
        let mut summary = AutoApproveSummary { examined: due.len(), ..Default::default() };

        for task_id in &due {
            match engine.try_auto_approve(task_id) {
                Ok(AutoApproveOutcome::Approved) => summary.approved += 1,
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!("⚠️ Auto-approve failed for task {task_id}: {e}");
                }
            }
        }

        if summary.examined > 0 {
            tracing::info!(
                "⏲️ Auto-approval sweep: {} examined, {} approved, {} skipped, {} failed",
                summary.examined,
                summary.approved,
                summary.skipped,
                summary.failed
            );
        }
        Ok(summary)
    }

    /// One pass over due, not-yet-sent escalations.
    pub async fn run_escalation_sweep(&self) -> Result<EscalationSummary> {
        let engine = self.engine.lock().await;
        let due = engine.db().due_escalations(Utc::now())?;
        let mut summary = EscalationSummary { examined: due.len(), ..Default::default() };

        for task_id in &due {
            match engine.try_escalate(task_id) {
                Ok(EscalateOutcome::Escalated { .. }) => summary.escalated += 1,
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!("⚠️ Escalation failed for task {task_id}: {e}");
                }
            }
        }

        if summary.examined > 0 {
            tracing::info!(
                "⏫ Escalation sweep: {} examined, {} escalated, {} skipped, {} failed",
                summary.examined,
                summary.escalated,
                summary.skipped,
                summary.failed
            );
        }
        Ok(summary)
    }
}

/// Spawn both sweep loops as background tokio tasks. A sweep that
/// errors at the store level logs and waits for the next tick.
pub fn spawn_sweep_loops(sweeper: Sweeper, config: &ApprovalSweepConfig) {
    tracing::info!(
        "⏰ Approval sweeps started (auto-approve every {}s, escalation every {}s)",
        config.auto_approve_check_secs,
        config.escalation_check_secs
    );

    let auto = sweeper.clone();
    let auto_secs = config.auto_approve_check_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(auto_secs));
        loop {
            interval.tick().await;
            if let Err(e) = auto.run_auto_approval_sweep().await {
                tracing::error!("Auto-approval sweep failed: {e}");
            }
        }
    });

    let esc = sweeper;
    let esc_secs = config.escalation_check_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(esc_secs));
        loop {
            interval.tick().await;
            if let Err(e) = esc.run_escalation_sweep().await {
                tracing::error!("Escalation sweep failed: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use teamline_approval::policy::{ApproverSpec, PolicyUpdate, RuleActions, RuleConditions};
    use teamline_approval::store::ApprovalDb;
    use teamline_approval::{InMemoryDirectory, InMemoryMembership, RecordingSink};
    use teamline_core::task::{Task, TaskPriority, TaskStatus, TaskType};
    use teamline_core::traits::{Notification, NotificationSink, NotifyKind};
    use teamline_core::user::ProjectRole;

    struct SharedSink(Arc<RecordingSink>);
    impl NotificationSink for SharedSink {
        fn notify(&self, n: &Notification) -> Result<()> {
            self.0.notify(n)
        }
    }

    /// Engine with one project, a lead and a PM, and a rule requiring
    /// lead review with both timers enabled.
    fn fixture() -> (Sweeper, Arc<Mutex<ApprovalEngine>>, Arc<RecordingSink>) {
        let db = ApprovalDb::open_in_memory().unwrap();
        db.update_policy(
            "p1",
            &PolicyUpdate {
                enabled: Some(true),
                require_approval_for: Some(vec![TaskType::Feature]),
                ..Default::default()
            },
        )
        .unwrap();
        db.add_rule(
            "p1",
            "features need lead review",
            1,
            RuleConditions::default(),
            RuleActions {
                require_approval: true,
                approvers: ApproverSpec { roles: vec![ProjectRole::TeamLead], ..Default::default() },
                auto_approve: true,
                auto_approve_after_hours: 24,
                escalate: true,
                escalate_after_hours: 48,
                ..Default::default()
            },
        )
        .unwrap();

        let mut members = InMemoryMembership::new();
        members.add("p1", "lead-1", ProjectRole::TeamLead);
        members.add("p1", "pm-1", ProjectRole::ProjectManager);
        let mut users = InMemoryDirectory::new();
        users.add("lead-1", "lead@teamline.dev");
        users.add("pm-1", "pm@teamline.dev");
        let sink = Arc::new(RecordingSink::new());

        let engine = Arc::new(Mutex::new(ApprovalEngine::new(
            db,
            Box::new(members),
            Box::new(users),
            Box::new(SharedSink(sink.clone())),
        )));
        (Sweeper::new(engine.clone()), engine, sink)
    }

    /// Submit a feature task and rewind the given timer into the past.
    async fn overdue_task(
        engine: &Arc<Mutex<ApprovalEngine>>,
        rewind_auto: bool,
        rewind_escalate: bool,
    ) -> String {
        let engine = engine.lock().await;
        let mut task = Task::new("p1", "Ship search", TaskType::Feature, TaskPriority::High);
        task.status = TaskStatus::InProgress;
        engine.db().save_task(&task).unwrap();
        engine.submit(&task.id).unwrap();

        let mut stored = engine.db().load_task(&task.id).unwrap().unwrap();
        if rewind_auto {
            stored.approval_config.auto_approve_at = Some(Utc::now() - Duration::hours(1));
        }
        if rewind_escalate {
            stored.approval_config.escalate_at = Some(Utc::now() - Duration::hours(1));
        }
        engine.db().save_task(&stored).unwrap();
        task.id
    }

    #[tokio::test]
    async fn test_auto_approval_sweep_approves_due_tasks() {
        let (sweeper, engine, _sink) = fixture();
        let task_id = overdue_task(&engine, true, false).await;

        let summary = sweeper.run_auto_approval_sweep().await.unwrap();
        assert_eq!(
            summary,
            AutoApproveSummary { examined: 1, approved: 1, skipped: 0, failed: 0 }
        );

        let engine = engine.lock().await;
        let task = engine.db().load_task(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);

        // Resolved tasks leave the candidate set
        drop(engine);
        let again = sweeper.run_auto_approval_sweep().await.unwrap();
        assert_eq!(again.examined, 0);
    }

    #[tokio::test]
    async fn test_auto_approval_sweep_ignores_future_timers() {
        let (sweeper, engine, _sink) = fixture();
        overdue_task(&engine, false, false).await;

        let summary = sweeper.run_auto_approval_sweep().await.unwrap();
        assert_eq!(summary.examined, 0);
        assert_eq!(summary.approved, 0);
    }

    #[tokio::test]
    async fn test_escalation_sweep_notifies_once() {
        let (sweeper, engine, sink) = fixture();
        let task_id = overdue_task(&engine, false, true).await;
        let before = sink.count();

        let summary = sweeper.run_escalation_sweep().await.unwrap();
        assert_eq!(
            summary,
            EscalationSummary { examined: 1, escalated: 1, skipped: 0, failed: 0 }
        );
        // Rule has no explicit escalation target; falls back to the PM
        let sent = sink.sent();
        assert_eq!(sent[before].kind, NotifyKind::Escalation);
        assert_eq!(sent[before].recipient_id, "pm-1");

        // The sent flag removes the task from the next sweep's set
        let again = sweeper.run_escalation_sweep().await.unwrap();
        assert_eq!(again.examined, 0);
        assert_eq!(sink.count(), before + 1);

        let engine = engine.lock().await;
        let task = engine.db().load_task(&task_id).unwrap().unwrap();
        assert!(task.approval_config.escalation_notification_sent);
        assert_eq!(task.status, TaskStatus::PendingApproval);
    }

    #[tokio::test]
    async fn test_escalated_task_still_auto_approves() {
        let (sweeper, engine, _sink) = fixture();
        let task_id = overdue_task(&engine, true, true).await;

        sweeper.run_escalation_sweep().await.unwrap();
        let summary = sweeper.run_auto_approval_sweep().await.unwrap();
        assert_eq!(summary.approved, 1);

        let engine = engine.lock().await;
        let task = engine.db().load_task(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
    }
}
