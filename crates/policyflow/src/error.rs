use thiserror::Error;

use crate::exec::RoutineKind;

pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors surfaced by policy validation, selection and job dispatch.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Bad or missing policy configuration. Never retried by the engine.
    #[error("{message}")]
    Config {
        message: String,
        detail: Option<String>,
        hint: Option<String>,
    },

    /// A referenced catalog object (job, chunk, routine) does not exist.
    #[error("{0} not found")]
    NotFound(String),

    #[error("unsupported function type for {routine}: {kind:?}")]
    UnsupportedAction { routine: String, kind: RoutineKind },

    /// Transaction/snapshot bookkeeping went out of sync. Indicates a bug.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The storage layer rejected a maintenance action.
    #[error("action failed: {0}")]
    Action(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl PolicyError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        match self {
            Self::Config { message, hint, .. } => Self::Config {
                message,
                detail: Some(detail.into()),
                hint,
            },
            other => other,
        }
    }

    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        match self {
            Self::Config {
                message, detail, ..
            } => Self::Config {
                message,
                detail,
                hint: Some(hint.into()),
            },
            other => other,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Stable code recorded with failed runs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG",
            Self::NotFound(_) => "NOT_FOUND",
            Self::UnsupportedAction { .. } => "UNSUPPORTED_ACTION",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::Action(_) => "ACTION_FAILED",
            Self::Database(_) => "DATABASE",
        }
    }
}
