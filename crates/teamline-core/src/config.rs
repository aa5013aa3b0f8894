//! Teamline configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TeamlineError};

/// Root configuration for the approval daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamlineConfig {
    /// Path to the approval database (SQLite).
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub approval: ApprovalSweepConfig,
}

/// Sweep intervals for the two scheduler jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSweepConfig {
    /// Seconds between auto-approval sweep ticks (default: hourly).
    #[serde(default = "default_auto_approve_secs")]
    pub auto_approve_check_secs: u64,
    /// Seconds between escalation sweep ticks (default: daily).
    #[serde(default = "default_escalation_secs")]
    pub escalation_check_secs: u64,
}

fn default_db_path() -> String {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".teamline")
        .join("approval.db")
        .to_string_lossy()
        .into_owned()
}
fn default_auto_approve_secs() -> u64 {
    3600
}
fn default_escalation_secs() -> u64 {
    86400
}

impl Default for TeamlineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            approval: ApprovalSweepConfig::default(),
        }
    }
}

impl Default for ApprovalSweepConfig {
    fn default() -> Self {
        Self {
            auto_approve_check_secs: default_auto_approve_secs(),
            escalation_check_secs: default_escalation_secs(),
        }
    }
}

impl TeamlineConfig {
    /// Load config from the default path (~/.teamline/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TeamlineError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TeamlineError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Default config path (~/.teamline/config.toml).
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".teamline").join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = TeamlineConfig::default();
        assert_eq!(cfg.approval.auto_approve_check_secs, 3600);
        assert_eq!(cfg.approval.escalation_check_secs, 86400);
        assert!(cfg.db_path.ends_with("approval.db"));
    }

    #[test]
    fn test_partial_toml() {
        let cfg: TeamlineConfig = toml::from_str(
            r#"
            db_path = "/tmp/test.db"

            [approval]
            auto_approve_check_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.db_path, "/tmp/test.db");
        assert_eq!(cfg.approval.auto_approve_check_secs, 60);
        // Omitted field falls back to its default
        assert_eq!(cfg.approval.escalation_check_secs, 86400);
    }
}
