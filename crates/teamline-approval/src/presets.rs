//! Built-in checklist presets.
//!
//! Canned templates a project can apply instead of authoring item
//! lists by hand. Applying a preset replaces the project's template
//! for one task type; tasks already carrying a checklist are never
//! touched.

use teamline_core::error::{Result, TeamlineError};
use teamline_core::task::TaskType;

use crate::policy::{ApprovalPolicy, ChecklistTemplateItem};
use crate::store::ApprovalDb;

/// A named, ready-made checklist template.
#[derive(Debug, Clone, Copy)]
pub struct ChecklistPreset {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// (item name, required)
    pub items: &'static [(&'static str, bool)],
}

const PRESETS: &[ChecklistPreset] = &[
    ChecklistPreset {
        id: "code-review",
        name: "Code review",
        description: "Standard review gate for feature work",
        items: &[
            ("Code reviewed by a peer", true),
            ("Unit tests added or updated", true),
            ("Documentation updated", false),
        ],
    },
    ChecklistPreset {
        id: "qa-signoff",
        name: "QA sign-off",
        description: "Manual verification before a bug fix ships",
        items: &[
            ("Fix verified against the original report", true),
            ("Regression tests pass", true),
            ("Edge cases exercised", false),
        ],
    },
    ChecklistPreset {
        id: "release",
        name: "Release readiness",
        description: "Pre-release gate for high-impact changes",
        items: &[
            ("Changelog entry written", true),
            ("Rollback plan documented", true),
            ("Stakeholders notified", true),
            ("Monitoring dashboards checked", false),
        ],
    },
];

/// All built-in presets.
pub fn list_presets() -> &'static [ChecklistPreset] {
    PRESETS
}

/// Look up a preset by id.
pub fn find_preset(id: &str) -> Option<&'static ChecklistPreset> {
    PRESETS.iter().find(|p| p.id == id)
}

/// Replace a project's checklist template for one task type with a
/// preset's items.
pub fn apply_preset(
    db: &ApprovalDb,
    project_id: &str,
    task_type: TaskType,
    preset_id: &str,
) -> Result<ApprovalPolicy> {
    let preset = find_preset(preset_id)
        .ok_or_else(|| TeamlineError::not_found(format!("checklist preset {preset_id}")))?;
    db.set_checklist_template(project_id, task_type, preset.template_items())
}

impl ChecklistPreset {
    /// Materialize the preset as template items.
    pub fn template_items(&self) -> Vec<ChecklistTemplateItem> {
        self.items
            .iter()
            .map(|(name, required)| ChecklistTemplateItem {
                name: (*name).to_string(),
                required: *required,
            })
            .collect()
    }
}
