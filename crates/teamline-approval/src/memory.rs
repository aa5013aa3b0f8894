//! In-memory collaborator implementations.
//!
//! Used by the engine and sweep tests, and handy for embedding the
//! approval core without a full Teamline deployment behind it.

use std::collections::HashMap;
use std::sync::Mutex;

use teamline_core::error::Result;
use teamline_core::traits::{MembershipProvider, Notification, NotificationSink, UserDirectory};
use teamline_core::user::{ProjectMember, ProjectRole, User};

/// Membership provider backed by a HashMap.
#[derive(Default)]
pub struct InMemoryMembership {
    /// project_id → members, in insertion order.
    members: HashMap<String, Vec<ProjectMember>>,
}

impl InMemoryMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, project_id: &str, user_id: &str, role: ProjectRole) {
        self.members
            .entry(project_id.to_string())
            .or_default()
            .push(ProjectMember { user_id: user_id.to_string(), role });
    }
}

impl MembershipProvider for InMemoryMembership {
    fn list_members(&self, project_id: &str) -> Result<Vec<ProjectMember>> {
        Ok(self.members.get(project_id).cloned().unwrap_or_default())
    }

    fn find_member(&self, user_id: &str, project_id: &str) -> Result<Option<ProjectMember>> {
        Ok(self
            .members
            .get(project_id)
            .and_then(|m| m.iter().find(|x| x.user_id == user_id).cloned()))
    }
}

/// User directory backed by a HashMap. Preserves the order of the
/// requested ids when resolving, matching directory semantics.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: HashMap<String, User>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: &str, email: &str) {
        self.users.insert(
            id.to_string(),
            User { id: id.to_string(), name: id.to_string(), email: email.to_string() },
        );
    }
}

impl UserDirectory for InMemoryDirectory {
    fn find_users(&self, ids: &[String]) -> Result<Vec<User>> {
        Ok(ids.iter().filter_map(|id| self.users.get(id).cloned()).collect())
    }
}

/// Notification sink that records everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, in order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|v| v.len()).unwrap_or(0)
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &Notification) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}
