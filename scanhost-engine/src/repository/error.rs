//! Error types for job persistence

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by job repositories
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Job row does not exist
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// Row was changed by another writer since it was loaded
    #[error("Job {id} was modified concurrently (expected version {expected_version})")]
    OptimisticLock { id: Uuid, expected_version: i32 },

    /// Job data was encrypted for another encryption pool
    #[error("Job {id} cannot be decrypted: {message}")]
    Decryption { id: Uuid, message: String },

    /// Stored job data is not readable
    #[error("Job {id} has unreadable data: {message}")]
    Serialization { id: Uuid, message: String },

    /// Database access failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepositoryError {
    /// Check if this error is a concurrent modification that may be retried
    pub fn is_optimistic_lock(&self) -> bool {
        matches!(self, Self::OptimisticLock { .. })
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error is a decryption failure
    pub fn is_decryption(&self) -> bool {
        matches!(self, Self::Decryption { .. })
    }
}
