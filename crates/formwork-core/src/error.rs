use thiserror::Error;

use crate::cx::CxError;

pub type Result<T> = std::result::Result<T, FormError>;

/// Errors surfaced by form construction and form operations.
///
/// Field, async, and cross-field validation failures are *not* errors in
/// this sense; they live in reactive cells as data.
#[derive(Debug, Error)]
pub enum FormError {
    /// The dependency rules contain a directed cycle. Fatal: the form must
    /// not activate.
    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("unknown field: {name}")]
    UnknownField { name: String },

    #[error("duplicate field: {name}")]
    DuplicateField { name: String },

    #[error("field is read-only: {name}")]
    ReadOnly { name: String },

    #[error("form has been destroyed")]
    Destroyed,

    #[error("history is not enabled for this form")]
    HistoryDisabled,

    #[error("checkpoint not found: {label}")]
    CheckpointNotFound { label: String },

    #[error("value contains a reference cycle and cannot be serialized")]
    CyclicValue,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FormError {
    #[must_use]
    pub fn unknown_field(name: impl Into<String>) -> Self {
        Self::UnknownField { name: name.into() }
    }

    /// Whether this error prevents the form from being used at all.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CircularDependency { .. } | Self::DuplicateField { .. } | Self::Config(_)
        )
    }
}

/// Outcome of an external asynchronous check that did not produce a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsyncCheckError {
    /// The check observed its cancellation token and gave up.
    #[error("async check cancelled")]
    Cancelled,
    /// The check itself failed (network, backend). Treated as fail-open.
    #[error("async check failed: {0}")]
    Failed(String),
}

impl From<CxError> for AsyncCheckError {
    fn from(err: CxError) -> Self {
        match err {
            CxError::Cancelled => Self::Cancelled,
            CxError::DeadlineExceeded => Self::Failed(err.to_string()),
        }
    }
}
