//! Service-level error type shared by every operation.

use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Engine is running in degraded mode without storage.
    ///
    /// Deliberately fails fast: retrying cannot help until the storage
    /// supervisor restores a backend, so the message must not match any
    /// retry allow-list fragment.
    #[error("engine degraded: no storage backend installed")]
    Degraded,
    /// A conditional write lost the optimistic concurrency race.
    #[error("version conflict for player `{player_id}`: expected {expected}, found {actual}")]
    Conflict {
        /// Player whose record was contended.
        player_id: String,
        /// Version the writer based its update on.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current queue state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Stored queue state failed integrity validation and cannot be repaired.
    #[error("integrity check failed for player `{player_id}`: {detail}")]
    Integrity {
        /// Player whose record is corrupt.
        player_id: String,
        /// Summary of the unrepairable issues.
        detail: String,
    },
    /// Caller exceeded its command rate limit.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    /// Circuit breaker refused the operation.
    #[error("circuit breaker `{0}` is open")]
    CircuitOpen(String),
    /// Operation still failing after exhausting its retry budget.
    #[error("operation `{operation}` failed after {attempts} attempt(s)")]
    RetriesExhausted {
        /// Logical operation name.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Final failure.
        #[source]
        source: Box<ServiceError>,
    },
    /// A task failed during pipeline execution.
    #[error("task execution failed: {0}")]
    TaskExecution(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::VersionConflict {
                player_id,
                expected,
                actual,
            } => ServiceError::Conflict {
                player_id,
                expected,
                actual,
            },
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}

impl ServiceError {
    /// Whether this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Conflict { .. })
    }
}
