//! Approver resolver — expands an approver spec into concrete users.
//!
//! Union order: role holders, then explicit users, then (if requested)
//! every project member. De-duplicated by user id, first occurrence
//! wins. An empty spec resolves to an empty set; the engine treats an
//! empty resolution as "no one to notify" and never opens a request
//! with zero approvers.

use std::collections::HashSet;

use teamline_core::error::Result;
use teamline_core::traits::{MembershipProvider, UserDirectory};
use teamline_core::user::{ProjectRole, User};

use crate::policy::{ApproverSpec, EscalationTarget};

/// Resolve an approver spec for a project.
pub fn resolve_approvers(
    spec: &ApproverSpec,
    project_id: &str,
    membership: &dyn MembershipProvider,
    directory: &dyn UserDirectory,
) -> Result<Vec<User>> {
    if spec.is_empty() {
        return Ok(Vec::new());
    }

    let members = membership.list_members(project_id)?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut resolved = Vec::new();

    // 1. Users holding any of the requested roles
    if !spec.roles.is_empty() {
        let ids: Vec<String> = members
            .iter()
            .filter(|m| spec.roles.contains(&m.role))
            .map(|m| m.user_id.clone())
            .collect();
        push_users(&mut resolved, &mut seen, directory.find_users(&ids)?);
    }

    // 2. Explicit users (existence-checked by the directory)
    if !spec.specific_users.is_empty() {
        push_users(
            &mut resolved,
            &mut seen,
            directory.find_users(&spec.specific_users)?,
        );
    }

    // 3. Every project member
    if spec.any_team_member {
        let ids: Vec<String> = members.iter().map(|m| m.user_id.clone()).collect();
        push_users(&mut resolved, &mut seen, directory.find_users(&ids)?);
    }

    Ok(resolved)
}

/// Resolve an escalation target (roles + explicit users, no
/// any-team-member option).
pub fn resolve_escalation(
    target: &EscalationTarget,
    project_id: &str,
    membership: &dyn MembershipProvider,
    directory: &dyn UserDirectory,
) -> Result<Vec<User>> {
    resolve_approvers(
        &ApproverSpec {
            roles: target.roles.clone(),
            specific_users: target.specific_users.clone(),
            any_team_member: false,
        },
        project_id,
        membership,
        directory,
    )
}

/// Everyone holding one specific role in a project (the "Team Lead"
/// and "Project Manager" fallback paths).
pub fn resolve_role_holders(
    role: ProjectRole,
    project_id: &str,
    membership: &dyn MembershipProvider,
    directory: &dyn UserDirectory,
) -> Result<Vec<User>> {
    resolve_approvers(
        &ApproverSpec { roles: vec![role], specific_users: Vec::new(), any_team_member: false },
        project_id,
        membership,
        directory,
    )
}

fn push_users(resolved: &mut Vec<User>, seen: &mut HashSet<String>, users: Vec<User>) {
    for user in users {
        if seen.insert(user.id.clone()) {
            resolved.push(user);
        }
    }
}
