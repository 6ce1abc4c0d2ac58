//! Core Error Types
//!
//! One taxonomy for the whole engine. Error codes are stable strings so API
//! layers and audit records can match on them without parsing messages.

use thiserror::Error;

/// Engine-wide error type.
///
/// Propagation policy: steps that mutate core invariants (status, balances)
/// return these errors loudly so the step executor never records a corrupted
/// result. Advisory steps (notifications) catch their own failures and
/// degrade to `Downstream` warnings in the workflow outcome.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Missing required input or an invalid state transition.
    /// Not retried automatically.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced entity does not exist inside the active tenant scope.
    /// Cross-tenant rows surface as this, never as the foreign row.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A CAS update or row lock lost a race. The current step attempt fails
    /// so the workflow runtime can decide whether to retry.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A best-effort collaborator failed. Logged and surfaced as a non-fatal
    /// warning; never rolls back committed business state.
    #[error("Downstream collaborator failed: {0}")]
    Downstream(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable error code for API responses and audit records.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            CoreError::Downstream(_) => "DOWNSTREAM_FAILURE",
            CoreError::Database(_) => "DATABASE_ERROR",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a failed step attempt may be retried by the runtime.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ConcurrencyConflict(_) | CoreError::Database(_)
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}
