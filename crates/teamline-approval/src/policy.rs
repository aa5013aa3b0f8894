//! Approval policy data model — one policy per project.
//!
//! A policy holds global toggles, an ordered list of rules, and
//! per-task-type checklist templates. Rules are addressed by stable
//! generated ids; their evaluation order is ascending `priority`, then
//! insertion order (tracked explicitly with `position`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use teamline_core::error::{Result, TeamlineError};
use teamline_core::task::{TaskPriority, TaskType};
use teamline_core::user::ProjectRole;

/// Per-project approval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub project_id: String,
    /// Master switch; when false no rule is ever applicable.
    pub enabled: bool,
    /// Task types eligible for approval at all.
    pub require_approval_for: Vec<TaskType>,
    /// Global fallback auto-approve timer (used when no rule matches).
    pub auto_approve_enabled: bool,
    pub auto_approve_after_hours: u32,
    /// Global fallback escalation timer.
    pub escalation_enabled: bool,
    pub escalation_after_hours: u32,
    /// Evaluated ascending by priority, then insertion position.
    pub rules: Vec<ApprovalRule>,
    /// Per task-type checklist templates, copied onto tasks when a rule
    /// first applies. Template edits never touch existing tasks.
    pub checklist_templates: BTreeMap<TaskType, Vec<ChecklistTemplateItem>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One conditional clause within a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: String,
    pub name: String,
    /// Lower number = higher precedence.
    pub priority: i32,
    pub enabled: bool,
    /// Insertion order, used to break priority ties deterministically.
    pub position: u32,
    pub conditions: RuleConditions,
    pub actions: RuleActions,
    pub created_at: DateTime<Utc>,
}

/// Rule conditions. Each field is optional and AND-ed with the others;
/// an empty field imposes no constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default)]
    pub task_types: Vec<TaskType>,
    #[serde(default)]
    pub priorities: Vec<TaskPriority>,
    #[serde(default)]
    pub story_points_min: Option<u32>,
    #[serde(default)]
    pub story_points_max: Option<u32>,
    /// Task's current assignee must be one of these.
    #[serde(default)]
    pub assignees: Vec<String>,
    /// Task must carry at least one of these labels (OR within this field).
    #[serde(default)]
    pub labels: Vec<String>,
}

/// What happens when a rule matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleActions {
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub approvers: ApproverSpec,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub auto_approve_after_hours: u32,
    #[serde(default)]
    pub escalate: bool,
    #[serde(default)]
    pub escalate_after_hours: u32,
    #[serde(default)]
    pub escalate_to: EscalationTarget,
}

/// Who must review. Expanded to concrete users by the resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApproverSpec {
    #[serde(default)]
    pub roles: Vec<ProjectRole>,
    #[serde(default)]
    pub specific_users: Vec<String>,
    #[serde(default)]
    pub any_team_member: bool,
}

/// Secondary audience for escalation notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationTarget {
    #[serde(default)]
    pub roles: Vec<ProjectRole>,
    #[serde(default)]
    pub specific_users: Vec<String>,
}

/// One checklist item definition inside a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistTemplateItem {
    pub name: String,
    pub required: bool,
}

/// Whitelisted policy-level fields a client may update. Structural
/// fields (rules, templates) have their own operations and can never be
/// overwritten through this path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub enabled: Option<bool>,
    pub require_approval_for: Option<Vec<TaskType>>,
    pub auto_approve_enabled: Option<bool>,
    pub auto_approve_after_hours: Option<u32>,
    pub escalation_enabled: Option<bool>,
    pub escalation_after_hours: Option<u32>,
}

/// Whitelisted per-rule update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub conditions: Option<RuleConditions>,
    pub actions: Option<RuleActions>,
}

impl ApprovalPolicy {
    /// A fresh policy: disabled, no rules, no templates.
    pub fn new(project_id: &str) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.to_string(),
            enabled: false,
            require_approval_for: Vec::new(),
            auto_approve_enabled: false,
            auto_approve_after_hours: 24,
            escalation_enabled: false,
            escalation_after_hours: 48,
            rules: Vec::new(),
            checklist_templates: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the given task type is eligible for approval at all.
    pub fn covers(&self, task_type: TaskType) -> bool {
        self.require_approval_for.contains(&task_type)
    }

    /// Enabled rules in evaluation order: ascending priority, ties
    /// broken by insertion position.
    pub fn sorted_rules(&self) -> Vec<&ApprovalRule> {
        let mut rules: Vec<&ApprovalRule> =
            self.rules.iter().filter(|r| r.enabled).collect();
        rules.sort_by_key(|r| (r.priority, r.position));
        rules
    }

    /// Apply a whitelisted update.
    pub fn apply_update(&mut self, update: &PolicyUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(types) = &update.require_approval_for {
            self.require_approval_for = types.clone();
        }
        if let Some(v) = update.auto_approve_enabled {
            self.auto_approve_enabled = v;
        }
        if let Some(v) = update.auto_approve_after_hours {
            self.auto_approve_after_hours = v;
        }
        if let Some(v) = update.escalation_enabled {
            self.escalation_enabled = v;
        }
        if let Some(v) = update.escalation_after_hours {
            self.escalation_after_hours = v;
        }
        self.updated_at = Utc::now();
    }

    /// Append a rule, assigning it an id and the next insertion position.
    pub fn add_rule(
        &mut self,
        name: &str,
        priority: i32,
        conditions: RuleConditions,
        actions: RuleActions,
    ) -> &ApprovalRule {
        let position = self.rules.iter().map(|r| r.position + 1).max().unwrap_or(0);
        self.rules.push(ApprovalRule {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            priority,
            enabled: true,
            position,
            conditions,
            actions,
            created_at: Utc::now(),
        });
        self.updated_at = Utc::now();
        self.rules.last().expect("just pushed")
    }

    /// Update a rule in place by id.
    pub fn update_rule(&mut self, rule_id: &str, update: &RuleUpdate) -> Result<&ApprovalRule> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| TeamlineError::not_found(format!("rule {rule_id}")))?;
        if let Some(name) = &update.name {
            rule.name = name.clone();
        }
        if let Some(priority) = update.priority {
            rule.priority = priority;
        }
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }
        if let Some(conditions) = &update.conditions {
            rule.conditions = conditions.clone();
        }
        if let Some(actions) = &update.actions {
            rule.actions = actions.clone();
        }
        self.updated_at = Utc::now();
        Ok(self
            .rules
            .iter()
            .find(|r| r.id == rule_id)
            .expect("rule exists"))
    }

    /// Remove a rule by id.
    pub fn delete_rule(&mut self, rule_id: &str) -> Result<()> {
        let len = self.rules.len();
        self.rules.retain(|r| r.id != rule_id);
        if self.rules.len() == len {
            return Err(TeamlineError::not_found(format!("rule {rule_id}")));
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Checklist template for a task type (empty if none configured).
    pub fn template(&self, task_type: TaskType) -> &[ChecklistTemplateItem] {
        self.checklist_templates
            .get(&task_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Replace the checklist template for a task type.
    pub fn set_template(&mut self, task_type: TaskType, items: Vec<ChecklistTemplateItem>) {
        self.checklist_templates.insert(task_type, items);
        self.updated_at = Utc::now();
    }
}

impl ApproverSpec {
    /// An empty spec resolves to an empty set.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.specific_users.is_empty() && !self.any_team_member
    }
}

impl EscalationTarget {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.specific_users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_policy_is_disabled_and_empty() {
        let policy = ApprovalPolicy::new("p1");
        assert!(!policy.enabled);
        assert!(policy.rules.is_empty());
        assert!(policy.checklist_templates.is_empty());
        assert!(!policy.covers(TaskType::Feature));
    }

    #[test]
    fn test_sorted_rules_priority_then_insertion() {
        let mut policy = ApprovalPolicy::new("p1");
        policy.add_rule("second", 5, RuleConditions::default(), RuleActions::default());
        policy.add_rule("first", 1, RuleConditions::default(), RuleActions::default());
        policy.add_rule("tied-with-second", 5, RuleConditions::default(), RuleActions::default());

        let order: Vec<&str> = policy.sorted_rules().iter().map(|r| r.name.as_str()).collect();
        // Ties resolve by insertion position — documented behavior.
        assert_eq!(order, vec!["first", "second", "tied-with-second"]);
    }

    #[test]
    fn test_disabled_rules_excluded() {
        let mut policy = ApprovalPolicy::new("p1");
        let id = policy
            .add_rule("only", 1, RuleConditions::default(), RuleActions::default())
            .id
            .clone();
        policy
            .update_rule(&id, &RuleUpdate { enabled: Some(false), ..Default::default() })
            .unwrap();
        assert!(policy.sorted_rules().is_empty());
    }

    #[test]
    fn test_update_whitelist_never_touches_rules() {
        let mut policy = ApprovalPolicy::new("p1");
        policy.add_rule("keep-me", 1, RuleConditions::default(), RuleActions::default());
        policy.apply_update(&PolicyUpdate {
            enabled: Some(true),
            auto_approve_after_hours: Some(12),
            ..Default::default()
        });
        assert!(policy.enabled);
        assert_eq!(policy.auto_approve_after_hours, 12);
        assert_eq!(policy.rules.len(), 1);
    }

    #[test]
    fn test_delete_unknown_rule() {
        let mut policy = ApprovalPolicy::new("p1");
        assert!(matches!(
            policy.delete_rule("nope"),
            Err(TeamlineError::NotFound(_))
        ));
    }

    #[test]
    fn test_template_edit_does_not_leak() {
        let mut policy = ApprovalPolicy::new("p1");
        policy.set_template(
            TaskType::Feature,
            vec![ChecklistTemplateItem { name: "Code reviewed".into(), required: true }],
        );
        assert_eq!(policy.template(TaskType::Feature).len(), 1);
        assert!(policy.template(TaskType::Bug).is_empty());
    }
}
