//! Error types for the engagement pipeline

use std::time::Duration;
use thiserror::Error;

/// Result type alias for engagement operations
pub type Result<T> = std::result::Result<T, EngagementError>;

/// Errors surfaced by the presence registry, assignment engine and alarm engine.
///
/// The classifier and selector are pure and never produce one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngagementError {
    /// Absent assignment, alarm or presence entry
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// State machine violation
    #[error("Cannot {action} {id}: {from}")]
    InvalidTransition {
        id: String,
        from: String,
        action: &'static str,
    },

    /// Agent selection yielded nothing
    #[error("No agents available ({reason}), retry after {}s", retry_after.as_secs())]
    NoAgents { retry_after: Duration, reason: String },

    /// Persistence failure, opaque to the caller
    #[error("Storage error: {0}")]
    Storage(String),

    /// Push queue saturated
    #[error("Push queue full: {0}")]
    Busy(String),

    /// Feature flag is off
    #[error("Feature disabled: {0}")]
    Disabled(&'static str),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngagementError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        id: impl ToString,
        action: &'static str,
        from: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            id: id.to_string(),
            from: from.into(),
            action,
        }
    }

    pub fn no_agents(retry_after: Duration, reason: impl Into<String>) -> Self {
        Self::NoAgents {
            retry_after,
            reason: reason.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a later retry of the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoAgents { .. } | Self::Storage(_) | Self::Busy(_))
    }

    /// Back-off hint carried by [`EngagementError::NoAgents`]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::NoAgents { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for EngagementError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for EngagementError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}
