//! Repository layer
//!
//! Persistence of the job row. The row is shared by every engine instance of a
//! cluster, so all writes go through an optimistic version check.
//!
//! All repositories are trait-based to enable testing and mocking.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use scanhost_core::domain::job::{Job, JobState};
use uuid::Uuid;

pub use error::RepositoryError;
pub use memory::InMemoryJobRepository;
pub use postgres::PgJobRepository;

/// Repository trait for job rows
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Loads a job by id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, RepositoryError>;

    /// Stores a new job row
    async fn insert(&self, job: &Job) -> Result<(), RepositoryError>;

    /// Saves a changed job
    ///
    /// Succeeds only when the stored version still equals `job.version`.
    /// Returns the saved job with its bumped version.
    ///
    /// # Arguments
    /// * `job` - The job as loaded and modified by the caller
    async fn save(&self, job: &Job) -> Result<Job, RepositoryError>;

    /// Sets the state of all given jobs in one write, ignoring versions
    ///
    /// Returns the number of rows changed.
    ///
    /// # Arguments
    /// * `ids` - Jobs to reset
    /// * `state` - The state to set
    async fn force_state_reset(&self, ids: &[Uuid], state: JobState)
    -> Result<u64, RepositoryError>;

    /// Lists jobs in the given state, oldest first
    async fn find_in_state(&self, state: JobState) -> Result<Vec<Job>, RepositoryError>;

    /// Moves the oldest READY_TO_START job of the server to QUEUED
    ///
    /// Returns the claimed job, `None` when nothing is ready.
    async fn claim_next_ready(&self, server_id: &str) -> Result<Option<Job>, RepositoryError>;
}
