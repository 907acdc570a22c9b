//! Backend-agnostic storage error surface.

use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be reached or failed internally.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable context for the failure.
        message: String,
        /// Backend-specific cause.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A conditional write lost the optimistic concurrency race.
    ///
    /// `actual` is the version found in the store at the time of the write,
    /// so the caller can reload and retry from it.
    #[error("version conflict for player `{player_id}`: expected {expected}, found {actual}")]
    VersionConflict {
        /// Player whose record was contended.
        player_id: String,
        /// Version the writer based its update on.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Whether this error is an optimistic concurrency conflict.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StorageError::VersionConflict { .. })
    }
}
