//! Teamline error type.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TeamlineError>;

/// Errors surfaced by the approval core.
#[derive(Debug, thiserror::Error)]
pub enum TeamlineError {
    /// Configuration file problems (unreadable, invalid TOML).
    #[error("Config error: {0}")]
    Config(String),

    /// Storage layer failures (SQLite open/read/write).
    #[error("Store error: {0}")]
    Store(String),

    /// A precondition for a state transition did not hold
    /// (e.g. approving with unchecked required checklist items).
    /// The message is a user-facing reason string.
    #[error("{0}")]
    Precondition(String),

    /// An entity referenced by id does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid policy or rule configuration.
    #[error("Policy error: {0}")]
    Policy(String),
}

impl TeamlineError {
    /// Store error from any displayable cause.
    pub fn store(e: impl std::fmt::Display) -> Self {
        Self::Store(e.to_string())
    }

    /// Precondition violation with a user-facing reason.
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition(reason.into())
    }

    /// Missing entity.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
