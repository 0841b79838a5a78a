//! Job transactions
//!
//! Small, self-contained updates of the job row. Every update reloads the row,
//! applies its change and saves; conflicting writers are retried a bounded
//! number of times.

use chrono::Utc;
use scanhost_core::domain::execution::ExecutionData;
use scanhost_core::domain::job::{Job, JobConfiguration, JobConfigurationData, JobState};
use scanhost_core::domain::message::JobMessage;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::repository::{JobRepository, RepositoryError};
use crate::retry::retry_when;

/// Attempts for intermediate writes (running mark, execution data, messages)
pub const INTERMEDIATE_WRITE_ATTEMPTS: usize = 3;
/// Attempts for the final state written by the reconciliation watcher
pub const FINAL_WRITE_ATTEMPTS: usize = 5;

/// Transactional job updates used by the execution engine
pub struct JobTransactions {
    repository: Arc<dyn JobRepository>,
    encryption_pool_id: i64,
}

impl JobTransactions {
    /// Creates the service
    ///
    /// # Arguments
    /// * `repository` - Job row persistence
    /// * `encryption_pool_id` - Pool whose job configurations this instance can read
    pub fn new(repository: Arc<dyn JobRepository>, encryption_pool_id: i64) -> Self {
        Self {
            repository,
            encryption_pool_id,
        }
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<Job>, RepositoryError> {
        self.repository.find_by_id(job_id).await
    }

    /// Marks the job RUNNING and sets its start time
    pub async fn mark_running(&self, job_id: Uuid) -> Result<Job, RepositoryError> {
        self.update(job_id, INTERMEDIATE_WRITE_ATTEMPTS, |job| {
            job.state = JobState::Running;
            job.started = Some(Utc::now());
        })
        .await
    }

    /// Marks the job CANCELED and sets its end time
    pub async fn mark_canceled(&self, job_id: Uuid) -> Result<Job, RepositoryError> {
        self.update(job_id, INTERMEDIATE_WRITE_ATTEMPTS, |job| {
            job.state = JobState::Canceled;
            job.ended = Some(Utc::now());
        })
        .await
    }

    /// Writes the terminal state and result text of an execution
    pub async fn persist_final_state(
        &self,
        job_id: Uuid,
        state: JobState,
        result: Option<&str>,
    ) -> Result<Job, RepositoryError> {
        self.update(job_id, FINAL_WRITE_ATTEMPTS, |job| {
            job.state = state;
            job.ended = Some(Utc::now());
            job.result = result.map(str::to_string);
        })
        .await
    }

    /// Loads and decodes the job configuration
    ///
    /// Fails with a decryption error when the job was stored for another
    /// encryption pool than the one this instance works with.
    pub async fn load_configuration_data(
        &self,
        job_id: Uuid,
    ) -> Result<JobConfigurationData, RepositoryError> {
        let job = self
            .repository
            .find_by_id(job_id)
            .await?
            .ok_or(RepositoryError::NotFound(job_id))?;

        if job.encryption_pool_id != self.encryption_pool_id {
            return Err(RepositoryError::Decryption {
                id: job_id,
                message: format!(
                    "configuration is encrypted for pool {}, this instance uses pool {}",
                    job.encryption_pool_id, self.encryption_pool_id
                ),
            });
        }

        let configuration = JobConfiguration::from_json(&job.configuration).map_err(|e| {
            RepositoryError::Serialization {
                id: job_id,
                message: e.to_string(),
            }
        })?;

        Ok(JobConfigurationData {
            configuration,
            meta_data: job.meta_data,
        })
    }

    /// Writes harvested stream and metadata text
    pub async fn update_execution_data(
        &self,
        job_id: Uuid,
        data: &ExecutionData,
    ) -> Result<Job, RepositoryError> {
        self.update(job_id, INTERMEDIATE_WRITE_ATTEMPTS, |job| {
            job.output_stream_text = data.output_stream.clone();
            job.error_stream_text = data.error_stream.clone();
            if data.meta_data.is_some() {
                job.meta_data = data.meta_data.clone();
            }
            job.last_stream_text_update = Some(Utc::now());
        })
        .await
    }

    /// Writes collected product messages as JSON array
    pub async fn update_messages(
        &self,
        job_id: Uuid,
        messages: &[JobMessage],
    ) -> Result<Job, RepositoryError> {
        let json =
            serde_json::to_string(messages).map_err(|e| RepositoryError::Serialization {
                id: job_id,
                message: e.to_string(),
            })?;

        self.update(job_id, INTERMEDIATE_WRITE_ATTEMPTS, |job| {
            job.messages = Some(json.clone());
        })
        .await
    }

    /// Records that a caller wants fresh stream text of a running job
    pub async fn request_stream_refresh(&self, job_id: Uuid) -> Result<Job, RepositoryError> {
        self.update(job_id, INTERMEDIATE_WRITE_ATTEMPTS, |job| {
            job.last_stream_text_refresh_request = Some(Utc::now());
        })
        .await
    }

    /// True when a refresh was requested after the last stream update
    pub async fn is_stream_update_necessary(&self, job_id: Uuid) -> Result<bool, RepositoryError> {
        let Some(job) = self.repository.find_by_id(job_id).await? else {
            return Ok(false);
        };

        Ok(match (
            job.last_stream_text_refresh_request,
            job.last_stream_text_update,
        ) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(requested), Some(updated)) => requested > updated,
        })
    }

    pub async fn force_state_reset(
        &self,
        job_ids: &[Uuid],
        state: JobState,
    ) -> Result<u64, RepositoryError> {
        self.repository.force_state_reset(job_ids, state).await
    }

    /// Reload, change and save with retries on optimistic lock conflicts
    async fn update<F>(
        &self,
        job_id: Uuid,
        max_attempts: usize,
        apply: F,
    ) -> Result<Job, RepositoryError>
    where
        F: Fn(&mut Job),
    {
        let apply = &apply;
        retry_when(max_attempts, RepositoryError::is_optimistic_lock, |attempt| {
            let repository = Arc::clone(&self.repository);
            async move {
                let mut job = repository
                    .find_by_id(job_id)
                    .await?
                    .ok_or(RepositoryError::NotFound(job_id))?;
                apply(&mut job);
                debug!(job_id = %job_id, attempt, "Saving job in state {}", job.state);
                repository.save(&job).await
            }
        })
        .await
    }
}
