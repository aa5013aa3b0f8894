//! SQLite-backed persistence for policies, tasks, and the notification
//! outbox. Policies and tasks are stored as id-addressed rows (rules,
//! approval requests, and checklist items each get their own table)
//! rather than embedded arrays, so sub-entities keep stable ids.
//!
//! Sweep-side completion uses conditional updates keyed on
//! `status = 'pending_approval'` — see [`ApprovalDb::update_task_if_pending`].

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use teamline_core::error::{Result, TeamlineError};
use teamline_core::task::{
    ApprovalConfig, ApprovalRequest, ApprovalStatus, ChecklistItem, RequestStatus, Task,
    TaskPriority, TaskStatus, TaskType,
};
use teamline_core::traits::{MembershipProvider, Notification, NotificationSink, UserDirectory};
use teamline_core::user::{ProjectMember, ProjectRole, User};

use crate::policy::{
    ApprovalPolicy, ApprovalRule, ChecklistTemplateItem, PolicyUpdate, RuleActions,
    RuleConditions, RuleUpdate,
};

/// SQLite store for all approval data.
pub struct ApprovalDb {
    conn: rusqlite::Connection,
}

impl ApprovalDb {
    /// Open or create the approval database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path).map_err(TeamlineError::store)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests and embedding.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(TeamlineError::store)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            -- One approval policy per project
            CREATE TABLE IF NOT EXISTS approval_policies (
                project_id TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 0,
                require_approval_for TEXT NOT NULL DEFAULT '[]',  -- JSON task types
                auto_approve_enabled INTEGER NOT NULL DEFAULT 0,
                auto_approve_after_hours INTEGER NOT NULL DEFAULT 24,
                escalation_enabled INTEGER NOT NULL DEFAULT 0,
                escalation_after_hours INTEGER NOT NULL DEFAULT 48,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Rules, id-addressed; position preserves insertion order
            CREATE TABLE IF NOT EXISTS approval_rules (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5,
                enabled INTEGER NOT NULL DEFAULT 1,
                position INTEGER NOT NULL DEFAULT 0,
                conditions TEXT NOT NULL,        -- JSON
                actions TEXT NOT NULL,           -- JSON
                created_at TEXT NOT NULL
            );

            -- Per task-type checklist templates
            CREATE TABLE IF NOT EXISTS checklist_templates (
                project_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                items TEXT NOT NULL,             -- JSON [{name, required}]
                PRIMARY KEY (project_id, task_type)
            );

            -- Approval-relevant task subset
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                task_type TEXT NOT NULL,
                priority TEXT NOT NULL,
                story_points INTEGER,
                assignee_id TEXT,
                labels TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'todo',
                approval_status TEXT,
                approval_required INTEGER NOT NULL DEFAULT 0,
                rule_id TEXT,
                rule_name TEXT,
                auto_approve INTEGER NOT NULL DEFAULT 0,
                auto_approve_at TEXT,
                escalate INTEGER NOT NULL DEFAULT 0,
                escalate_at TEXT,
                escalation_notification_sent INTEGER NOT NULL DEFAULT 0,
                bypass_reason TEXT,
                bypassed_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );

            -- Append-only review history
            CREATE TABLE IF NOT EXISTS approval_requests (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                approvers TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'pending',
                decided_by TEXT,
                decided_at TEXT,
                reason TEXT
            );

            -- Checklist items, copied from the template per task
            CREATE TABLE IF NOT EXISTS checklist_items (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                required INTEGER NOT NULL DEFAULT 0,
                checked INTEGER NOT NULL DEFAULT 0,
                checked_by TEXT,
                checked_at TEXT,
                note TEXT
            );

            -- Collaborator data mirrored from the main application
            CREATE TABLE IF NOT EXISTS project_members (
                project_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (project_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL
            );

            -- Notification outbox
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                task_id TEXT,
                project_id TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                sent_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_rules_project
                ON approval_rules(project_id, priority, position);
            CREATE INDEX IF NOT EXISTS idx_tasks_auto_approve
                ON tasks(status, auto_approve, auto_approve_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_escalate
                ON tasks(status, escalate, escalate_at);
            CREATE INDEX IF NOT EXISTS idx_requests_task
                ON approval_requests(task_id, requested_at);
            CREATE INDEX IF NOT EXISTS idx_checklist_task
                ON checklist_items(task_id, position);
         ",
            )
            .map_err(|e| TeamlineError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Policies ──────────────────────────────────────────────

    /// Load a project's policy, if one exists. Plain read, never writes.
    pub fn load_policy(&self, project_id: &str) -> Result<Option<ApprovalPolicy>> {
        let row = self
            .conn
            .query_row(
                "SELECT enabled, require_approval_for, auto_approve_enabled,
                        auto_approve_after_hours, escalation_enabled, escalation_after_hours,
                        created_at, updated_at
                 FROM approval_policies WHERE project_id = ?1",
                [project_id],
                |row| {
                    Ok((
                        row.get::<_, i32>(0)? != 0,
                        row.get::<_, String>(1)?,
                        row.get::<_, i32>(2)? != 0,
                        row.get::<_, u32>(3)?,
                        row.get::<_, i32>(4)? != 0,
                        row.get::<_, u32>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(TeamlineError::store(other)),
            })?;

        let Some((
            enabled,
            types_json,
            auto_approve_enabled,
            auto_approve_after_hours,
            escalation_enabled,
            escalation_after_hours,
            created_at,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(ApprovalPolicy {
            project_id: project_id.to_string(),
            enabled,
            require_approval_for: serde_json::from_str(&types_json).unwrap_or_default(),
            auto_approve_enabled,
            auto_approve_after_hours,
            escalation_enabled,
            escalation_after_hours,
            rules: self.load_rules(project_id)?,
            checklist_templates: self.load_templates(project_id)?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        }))
    }

    /// Explicit get-or-create; a fresh policy is disabled and empty.
    pub fn get_or_create_policy(&self, project_id: &str) -> Result<ApprovalPolicy> {
        if let Some(policy) = self.load_policy(project_id)? {
            return Ok(policy);
        }
        let policy = ApprovalPolicy::new(project_id);
        self.save_policy(&policy)?;
        tracing::info!("Created default approval policy for project {project_id}");
        Ok(policy)
    }

    /// Upsert a policy and all of its rules and templates.
    pub fn save_policy(&self, policy: &ApprovalPolicy) -> Result<()> {
        let tx = self.conn.unchecked_transaction().map_err(TeamlineError::store)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO approval_policies
                 (project_id, enabled, require_approval_for, auto_approve_enabled,
                  auto_approve_after_hours, escalation_enabled, escalation_after_hours,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    policy.project_id,
                    policy.enabled as i32,
                    json(&policy.require_approval_for)?,
                    policy.auto_approve_enabled as i32,
                    policy.auto_approve_after_hours,
                    policy.escalation_enabled as i32,
                    policy.escalation_after_hours,
                    ts(policy.created_at),
                    ts(policy.updated_at),
                ],
            )
            .map_err(TeamlineError::store)?;

        self.conn
            .execute(
                "DELETE FROM approval_rules WHERE project_id = ?1",
                [&policy.project_id],
            )
            .map_err(TeamlineError::store)?;
        for rule in &policy.rules {
            self.conn
                .execute(
                    "INSERT INTO approval_rules
                     (id, project_id, name, priority, enabled, position, conditions, actions, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        rule.id,
                        policy.project_id,
                        rule.name,
                        rule.priority,
                        rule.enabled as i32,
                        rule.position,
                        json(&rule.conditions)?,
                        json(&rule.actions)?,
                        ts(rule.created_at),
                    ],
                )
                .map_err(TeamlineError::store)?;
        }

        self.conn
            .execute(
                "DELETE FROM checklist_templates WHERE project_id = ?1",
                [&policy.project_id],
            )
            .map_err(TeamlineError::store)?;
        for (task_type, items) in &policy.checklist_templates {
            self.conn
                .execute(
                    "INSERT INTO checklist_templates (project_id, task_type, items)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![policy.project_id, task_type.as_str(), json(items)?],
                )
                .map_err(TeamlineError::store)?;
        }
        tx.commit().map_err(TeamlineError::store)
    }

    /// Cascade-delete a project's policy (for project deletion).
    pub fn delete_policy(&self, project_id: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction().map_err(TeamlineError::store)?;
        self.conn
            .execute("DELETE FROM approval_rules WHERE project_id = ?1", [project_id])
            .map_err(TeamlineError::store)?;
        self.conn
            .execute("DELETE FROM checklist_templates WHERE project_id = ?1", [project_id])
            .map_err(TeamlineError::store)?;
        self.conn
            .execute("DELETE FROM approval_policies WHERE project_id = ?1", [project_id])
            .map_err(TeamlineError::store)?;
        tx.commit().map_err(TeamlineError::store)
    }

    /// Apply a whitelisted policy update.
    pub fn update_policy(&self, project_id: &str, update: &PolicyUpdate) -> Result<ApprovalPolicy> {
        let mut policy = self.get_or_create_policy(project_id)?;
        policy.apply_update(update);
        self.save_policy(&policy)?;
        Ok(policy)
    }

    /// Toggle the master switch.
    pub fn set_policy_enabled(&self, project_id: &str, enabled: bool) -> Result<ApprovalPolicy> {
        self.update_policy(project_id, &PolicyUpdate { enabled: Some(enabled), ..Default::default() })
    }

    /// Append a rule to a project's policy.
    pub fn add_rule(
        &self,
        project_id: &str,
        name: &str,
        priority: i32,
        conditions: RuleConditions,
        actions: RuleActions,
    ) -> Result<ApprovalRule> {
        let mut policy = self.get_or_create_policy(project_id)?;
        let rule = policy.add_rule(name, priority, conditions, actions).clone();
        self.save_policy(&policy)?;
        Ok(rule)
    }

    /// Update a rule by id.
    pub fn update_rule(
        &self,
        project_id: &str,
        rule_id: &str,
        update: &RuleUpdate,
    ) -> Result<ApprovalRule> {
        let mut policy = self
            .load_policy(project_id)?
            .ok_or_else(|| TeamlineError::not_found(format!("policy for project {project_id}")))?;
        let rule = policy.update_rule(rule_id, update)?.clone();
        self.save_policy(&policy)?;
        Ok(rule)
    }

    /// Delete a rule by id.
    pub fn delete_rule(&self, project_id: &str, rule_id: &str) -> Result<()> {
        let mut policy = self
            .load_policy(project_id)?
            .ok_or_else(|| TeamlineError::not_found(format!("policy for project {project_id}")))?;
        policy.delete_rule(rule_id)?;
        self.save_policy(&policy)
    }

    /// Replace a task type's checklist template.
    pub fn set_checklist_template(
        &self,
        project_id: &str,
        task_type: TaskType,
        items: Vec<ChecklistTemplateItem>,
    ) -> Result<ApprovalPolicy> {
        let mut policy = self.get_or_create_policy(project_id)?;
        policy.set_template(task_type, items);
        self.save_policy(&policy)?;
        Ok(policy)
    }

    fn load_rules(&self, project_id: &str) -> Result<Vec<ApprovalRule>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, priority, enabled, position, conditions, actions, created_at
                 FROM approval_rules WHERE project_id = ?1 ORDER BY position",
            )
            .map_err(TeamlineError::store)?;
        let rows = stmt
            .query_map([project_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)?,
                    row.get::<_, i32>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(TeamlineError::store)?;

        let mut rules = Vec::new();
        for row in rows {
            let (id, name, priority, enabled, position, conditions, actions, created_at) =
                row.map_err(TeamlineError::store)?;
            // A corrupt JSON column must fail the load; defaulting here
            // would silently turn the rule into a match-everything one.
            rules.push(ApprovalRule {
                conditions: serde_json::from_str(&conditions).map_err(|e| {
                    TeamlineError::Store(format!("rule {id}: bad conditions JSON: {e}"))
                })?,
                actions: serde_json::from_str(&actions).map_err(|e| {
                    TeamlineError::Store(format!("rule {id}: bad actions JSON: {e}"))
                })?,
                id,
                name,
                priority,
                enabled: enabled != 0,
                position,
                created_at: parse_ts(&created_at),
            });
        }
        Ok(rules)
    }

    fn load_templates(
        &self,
        project_id: &str,
    ) -> Result<BTreeMap<TaskType, Vec<ChecklistTemplateItem>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT task_type, items FROM checklist_templates WHERE project_id = ?1")
            .map_err(TeamlineError::store)?;
        let rows = stmt
            .query_map([project_id], |row| {
                let task_type: String = row.get(0)?;
                let items: String = row.get(1)?;
                Ok((task_type, items))
            })
            .map_err(TeamlineError::store)?;

        let mut templates = BTreeMap::new();
        for row in rows {
            let (task_type, items) = row.map_err(TeamlineError::store)?;
            templates.insert(
                TaskType::parse(&task_type),
                serde_json::from_str(&items).map_err(|e| {
                    TeamlineError::Store(format!("checklist template {task_type}: bad JSON: {e}"))
                })?,
            );
        }
        Ok(templates)
    }

    // ─── Tasks ─────────────────────────────────────────────────

    /// Upsert a task with its requests and checklist, atomically: on
    /// any failure the previous stored state is kept.
    pub fn save_task(&self, task: &Task) -> Result<()> {
        let tx = self.conn.unchecked_transaction().map_err(TeamlineError::store)?;
        self.write_task_row(task, false)?;
        self.write_task_children(task)?;
        tx.commit().map_err(TeamlineError::store)
    }

    /// Conditional (CAS) task update: the row is written only while the
    /// stored status is still `pending_approval`. Returns false when a
    /// concurrent decision got there first; the caller must then discard
    /// its intended transition. Row and children commit together.
    pub fn update_task_if_pending(&self, task: &Task) -> Result<bool> {
        let tx = self.conn.unchecked_transaction().map_err(TeamlineError::store)?;
        if !self.write_task_row(task, true)? {
            return Ok(false);
        }
        self.write_task_children(task)?;
        tx.commit().map_err(TeamlineError::store)?;
        Ok(true)
    }

    fn write_task_row(&self, task: &Task, only_if_pending: bool) -> Result<bool> {
        let sql = if only_if_pending {
            "UPDATE tasks SET
                project_id = ?2, title = ?3, task_type = ?4, priority = ?5,
                story_points = ?6, assignee_id = ?7, labels = ?8, status = ?9,
                approval_status = ?10, approval_required = ?11, rule_id = ?12,
                rule_name = ?13, auto_approve = ?14, auto_approve_at = ?15,
                escalate = ?16, escalate_at = ?17, escalation_notification_sent = ?18,
                bypass_reason = ?19, bypassed_by = ?20, created_at = ?21,
                updated_at = ?22, completed_at = ?23
             WHERE id = ?1 AND status = 'pending_approval'"
        } else {
            "INSERT OR REPLACE INTO tasks
                (id, project_id, title, task_type, priority, story_points, assignee_id,
                 labels, status, approval_status, approval_required, rule_id, rule_name,
                 auto_approve, auto_approve_at, escalate, escalate_at,
                 escalation_notification_sent, bypass_reason, bypassed_by,
                 created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"
        };
        let cfg = &task.approval_config;
        let changed = self
            .conn
            .execute(
                sql,
                rusqlite::params![
                    task.id,
                    task.project_id,
                    task.title,
                    task.task_type.as_str(),
                    task.priority.as_str(),
                    task.story_points,
                    task.assignee_id,
                    json(&task.labels)?,
                    task.status.as_str(),
                    task.approval_status.map(|s| s.as_str()),
                    cfg.required as i32,
                    cfg.rule_id,
                    cfg.rule_name,
                    cfg.auto_approve as i32,
                    cfg.auto_approve_at.map(ts),
                    cfg.escalate as i32,
                    cfg.escalate_at.map(ts),
                    cfg.escalation_notification_sent as i32,
                    cfg.bypass_reason,
                    cfg.bypassed_by,
                    ts(task.created_at),
                    ts(task.updated_at),
                    task.completed_at.map(ts),
                ],
            )
            .map_err(TeamlineError::store)?;
        Ok(changed == 1)
    }

    /// Requests are upserted by id (append-only: closing a request only
    /// fills its decision fields); the checklist is rewritten in order.
    fn write_task_children(&self, task: &Task) -> Result<()> {
        for request in &task.approval_requests {
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO approval_requests
                     (id, task_id, requested_at, approvers, status, decided_by, decided_at, reason)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        request.id,
                        task.id,
                        ts(request.requested_at),
                        json(&request.approvers)?,
                        request.status.as_str(),
                        request.decided_by,
                        request.decided_at.map(ts),
                        request.reason,
                    ],
                )
                .map_err(TeamlineError::store)?;
        }

        self.conn
            .execute("DELETE FROM checklist_items WHERE task_id = ?1", [&task.id])
            .map_err(TeamlineError::store)?;
        for (position, item) in task.checklist.iter().enumerate() {
            self.conn
                .execute(
                    "INSERT INTO checklist_items
                     (id, task_id, position, name, required, checked, checked_by, checked_at, note)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        item.id,
                        task.id,
                        position as i64,
                        item.name,
                        item.required as i32,
                        item.checked as i32,
                        item.checked_by,
                        item.checked_at.map(ts),
                        item.note,
                    ],
                )
                .map_err(TeamlineError::store)?;
        }
        Ok(())
    }

    /// Load a task with its requests and checklist.
    pub fn load_task(&self, id: &str) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                "SELECT project_id, title, task_type, priority, story_points, assignee_id,
                        labels, status, approval_status, approval_required, rule_id, rule_name,
                        auto_approve, auto_approve_at, escalate, escalate_at,
                        escalation_notification_sent, bypass_reason, bypassed_by,
                        created_at, updated_at, completed_at
                 FROM tasks WHERE id = ?1",
                [id],
                |row| {
                    Ok(Task {
                        id: id.to_string(),
                        project_id: row.get(0)?,
                        title: row.get(1)?,
                        task_type: TaskType::parse(&row.get::<_, String>(2)?),
                        priority: TaskPriority::parse(&row.get::<_, String>(3)?),
                        story_points: row.get(4)?,
                        assignee_id: row.get(5)?,
                        labels: serde_json::from_str(&row.get::<_, String>(6)?)
                            .unwrap_or_default(),
                        status: TaskStatus::parse(&row.get::<_, String>(7)?),
                        approval_status: row
                            .get::<_, Option<String>>(8)?
                            .as_deref()
                            .and_then(ApprovalStatus::parse),
                        approval_config: ApprovalConfig {
                            required: row.get::<_, i32>(9)? != 0,
                            rule_id: row.get(10)?,
                            rule_name: row.get(11)?,
                            auto_approve: row.get::<_, i32>(12)? != 0,
                            auto_approve_at: parse_ts_opt(row.get::<_, Option<String>>(13)?),
                            escalate: row.get::<_, i32>(14)? != 0,
                            escalate_at: parse_ts_opt(row.get::<_, Option<String>>(15)?),
                            escalation_notification_sent: row.get::<_, i32>(16)? != 0,
                            bypass_reason: row.get(17)?,
                            bypassed_by: row.get(18)?,
                        },
                        approval_requests: Vec::new(),
                        checklist: Vec::new(),
                        created_at: parse_ts(&row.get::<_, String>(19)?),
                        updated_at: parse_ts(&row.get::<_, String>(20)?),
                        completed_at: parse_ts_opt(row.get::<_, Option<String>>(21)?),
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(TeamlineError::store(other)),
            })?;

        let Some(mut task) = row else {
            return Ok(None);
        };
        task.approval_requests = self.load_requests(id)?;
        task.checklist = self.load_checklist(id)?;
        Ok(Some(task))
    }

    fn load_requests(&self, task_id: &str) -> Result<Vec<ApprovalRequest>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, requested_at, approvers, status, decided_by, decided_at, reason
                 FROM approval_requests WHERE task_id = ?1 ORDER BY requested_at, id",
            )
            .map_err(TeamlineError::store)?;
        let rows = stmt
            .query_map([task_id], |row| {
                Ok(ApprovalRequest {
                    id: row.get(0)?,
                    requested_at: parse_ts(&row.get::<_, String>(1)?),
                    approvers: serde_json::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or_default(),
                    status: RequestStatus::parse(&row.get::<_, String>(3)?),
                    decided_by: row.get(4)?,
                    decided_at: parse_ts_opt(row.get::<_, Option<String>>(5)?),
                    reason: row.get(6)?,
                })
            })
            .map_err(TeamlineError::store)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(TeamlineError::store)
    }

    fn load_checklist(&self, task_id: &str) -> Result<Vec<ChecklistItem>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, required, checked, checked_by, checked_at, note
                 FROM checklist_items WHERE task_id = ?1 ORDER BY position",
            )
            .map_err(TeamlineError::store)?;
        let rows = stmt
            .query_map([task_id], |row| {
                Ok(ChecklistItem {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    required: row.get::<_, i32>(2)? != 0,
                    checked: row.get::<_, i32>(3)? != 0,
                    checked_by: row.get(4)?,
                    checked_at: parse_ts_opt(row.get::<_, Option<String>>(5)?),
                    note: row.get(6)?,
                })
            })
            .map_err(TeamlineError::store)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(TeamlineError::store)
    }

    // ─── Sweep queries ─────────────────────────────────────────

    /// Tasks whose auto-approve deadline has passed.
    pub fn due_auto_approvals(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.task_ids(
            "SELECT id FROM tasks
             WHERE status = 'pending_approval' AND auto_approve = 1
               AND auto_approve_at IS NOT NULL AND auto_approve_at <= ?1
             ORDER BY auto_approve_at",
            now,
        )
    }

    /// Tasks past their escalation deadline that have not been escalated.
    pub fn due_escalations(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.task_ids(
            "SELECT id FROM tasks
             WHERE status = 'pending_approval' AND escalate = 1
               AND escalate_at IS NOT NULL AND escalate_at <= ?1
               AND escalation_notification_sent = 0
             ORDER BY escalate_at",
            now,
        )
    }

    fn task_ids(&self, sql: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql).map_err(TeamlineError::store)?;
        let rows = stmt
            .query_map([ts(now)], |row| row.get::<_, String>(0))
            .map_err(TeamlineError::store)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(TeamlineError::store)
    }

    /// Mark escalation sent, but only if no other tick got there first.
    /// Returns false when the flag was already set (or the task left
    /// pending approval) — escalation fires at most once per submission.
    pub fn mark_escalated_if_unsent(&self, task_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE tasks SET escalation_notification_sent = 1, updated_at = ?2
                 WHERE id = ?1 AND status = 'pending_approval'
                   AND escalation_notification_sent = 0",
                rusqlite::params![task_id, ts(Utc::now())],
            )
            .map_err(TeamlineError::store)?;
        Ok(changed == 1)
    }
}

// ─── SQLite-backed collaborators ───────────────────────────────

/// Membership, user directory, and notification outbox backed by the
/// same SQLite file, for running the daemon without the main
/// application attached. The outbox only records — the web layer drains
/// and delivers it.
pub struct SqliteCollaborators {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteCollaborators {
    /// Open on the same database file as [`ApprovalDb`].
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path).map_err(TeamlineError::store)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn add_user(&self, user: &User) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO users (id, name, email) VALUES (?1, ?2, ?3)",
            rusqlite::params![user.id, user.name, user.email],
        )
        .map_err(TeamlineError::store)?;
        Ok(())
    }

    pub fn add_member(&self, project_id: &str, user_id: &str, role: ProjectRole) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO project_members (project_id, user_id, role)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![project_id, user_id, role.as_str()],
        )
        .map_err(TeamlineError::store)?;
        Ok(())
    }

    /// Recent outbox entries, newest first.
    pub fn recent_notifications(&self, limit: usize) -> Result<Vec<serde_json::Value>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, recipient_id, kind, title, message, task_id, project_id,
                        priority, status, created_at
                 FROM notifications ORDER BY id DESC LIMIT ?1",
            )
            .map_err(TeamlineError::store)?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, i64>(0)?,
                    "recipient_id": row.get::<_, String>(1)?,
                    "kind": row.get::<_, String>(2)?,
                    "title": row.get::<_, String>(3)?,
                    "message": row.get::<_, String>(4)?,
                    "task_id": row.get::<_, Option<String>>(5)?,
                    "project_id": row.get::<_, String>(6)?,
                    "priority": row.get::<_, String>(7)?,
                    "status": row.get::<_, String>(8)?,
                    "created_at": row.get::<_, String>(9)?,
                }))
            })
            .map_err(TeamlineError::store)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(TeamlineError::store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| TeamlineError::Store("collaborator connection poisoned".into()))
    }
}

impl MembershipProvider for SqliteCollaborators {
    fn list_members(&self, project_id: &str) -> Result<Vec<ProjectMember>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, role FROM project_members
                 WHERE project_id = ?1 ORDER BY user_id",
            )
            .map_err(TeamlineError::store)?;
        let rows = stmt
            .query_map([project_id], |row| {
                Ok(ProjectMember {
                    user_id: row.get(0)?,
                    role: ProjectRole::parse(&row.get::<_, String>(1)?),
                })
            })
            .map_err(TeamlineError::store)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(TeamlineError::store)
    }

    fn find_member(&self, user_id: &str, project_id: &str) -> Result<Option<ProjectMember>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2",
            rusqlite::params![project_id, user_id],
            |row| {
                Ok(ProjectMember {
                    user_id: user_id.to_string(),
                    role: ProjectRole::parse(&row.get::<_, String>(0)?),
                })
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(TeamlineError::store(other)),
        })
    }
}

impl UserDirectory for SqliteCollaborators {
    fn find_users(&self, ids: &[String]) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut found = Vec::new();
        for id in ids {
            let user = conn
                .query_row(
                    "SELECT id, name, email FROM users WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(User { id: row.get(0)?, name: row.get(1)?, email: row.get(2)? })
                    },
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(TeamlineError::store(other)),
                })?;
            if let Some(user) = user {
                found.push(user);
            }
        }
        Ok(found)
    }
}

impl NotificationSink for SqliteCollaborators {
    fn notify(&self, n: &Notification) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notifications
             (recipient_id, kind, title, message, task_id, project_id, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                n.recipient_id,
                n.kind.as_str(),
                n.title,
                n.message,
                n.task_id,
                n.project_id,
                n.priority.as_str(),
                ts(n.created_at),
            ],
        )
        .map_err(TeamlineError::store)?;
        Ok(())
    }
}

/// Cheaply-clonable handle serving all three collaborator seams from
/// one [`SqliteCollaborators`].
#[derive(Clone)]
pub struct SharedCollaborators(Arc<SqliteCollaborators>);

impl SharedCollaborators {
    pub fn new(inner: SqliteCollaborators) -> Self {
        Self(Arc::new(inner))
    }

    pub fn inner(&self) -> &SqliteCollaborators {
        &self.0
    }
}

impl MembershipProvider for SharedCollaborators {
    fn list_members(&self, project_id: &str) -> Result<Vec<ProjectMember>> {
        self.0.list_members(project_id)
    }

    fn find_member(&self, user_id: &str, project_id: &str) -> Result<Option<ProjectMember>> {
        self.0.find_member(user_id, project_id)
    }
}

impl UserDirectory for SharedCollaborators {
    fn find_users(&self, ids: &[String]) -> Result<Vec<User>> {
        self.0.find_users(ids)
    }
}

impl NotificationSink for SharedCollaborators {
    fn notify(&self, n: &Notification) -> Result<()> {
        self.0.notify(n)
    }
}

// ─── Timestamp helpers ─────────────────────────────────────────

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| TeamlineError::Store(format!("Serialize: {e}")))
}
