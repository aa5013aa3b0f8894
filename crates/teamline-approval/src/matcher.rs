//! Rule matcher — ordered, first-match evaluation of policy rules.
//!
//! Pure function over a policy + task snapshot; no side effects.

use teamline_core::task::Task;

use crate::policy::{ApprovalPolicy, ApprovalRule, RuleConditions};

/// Select the single applicable rule for a task, or None.
///
/// Returns None immediately when the policy is disabled. Otherwise
/// enabled rules are evaluated in ascending priority (insertion order
/// within equal priority) and the first rule whose conditions all hold
/// wins. No match → the caller falls back to the policy's global
/// settings.
pub fn match_rule<'a>(policy: &'a ApprovalPolicy, task: &Task) -> Option<&'a ApprovalRule> {
    if !policy.enabled {
        return None;
    }
    policy
        .sorted_rules()
        .into_iter()
        .find(|rule| conditions_hold(&rule.conditions, task))
}

/// Every present condition must hold; absent/empty conditions impose
/// no constraint.
fn conditions_hold(c: &RuleConditions, task: &Task) -> bool {
    matches_task_type(c, task)
        && matches_priority(c, task)
        && matches_story_points(c, task)
        && matches_assignee(c, task)
        && matches_labels(c, task)
}

fn matches_task_type(c: &RuleConditions, task: &Task) -> bool {
    c.task_types.is_empty() || c.task_types.contains(&task.task_type)
}

fn matches_priority(c: &RuleConditions, task: &Task) -> bool {
    c.priorities.is_empty() || c.priorities.contains(&task.priority)
}

/// Inclusive bounds; a bound only applies to tasks that have an
/// estimate at all.
fn matches_story_points(c: &RuleConditions, task: &Task) -> bool {
    if c.story_points_min.is_none() && c.story_points_max.is_none() {
        return true;
    }
    let Some(points) = task.story_points else {
        return false;
    };
    if let Some(min) = c.story_points_min
        && points < min
    {
        return false;
    }
    if let Some(max) = c.story_points_max
        && points > max
    {
        return false;
    }
    true
}

fn matches_assignee(c: &RuleConditions, task: &Task) -> bool {
    if c.assignees.is_empty() {
        return true;
    }
    match &task.assignee_id {
        Some(id) => c.assignees.contains(id),
        None => false,
    }
}

/// OR semantics within this one condition: any shared label matches.
fn matches_labels(c: &RuleConditions, task: &Task) -> bool {
    c.labels.is_empty() || task.labels.iter().any(|l| c.labels.contains(l))
}
