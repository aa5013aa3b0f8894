//! Users and project membership.

use serde::{Deserialize, Serialize};

/// A Teamline user, as surfaced by the user directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// One user's membership in a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMember {
    pub user_id: String,
    pub role: ProjectRole,
}

/// Role a member holds within a project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    ProjectManager,
    TeamLead,
    Member,
    Viewer,
}

impl ProjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectManager => "project_manager",
            Self::TeamLead => "team_lead",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "project_manager" => Self::ProjectManager,
            "team_lead" => Self::TeamLead,
            "viewer" => Self::Viewer,
            _ => Self::Member,
        }
    }
}
