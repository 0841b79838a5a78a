//! Ready job trigger
//!
//! Moves READY_TO_START jobs of this server into the local execution queue as
//! long as the queue has room.

use std::sync::Arc;
use tracing::{debug, info};

use super::queue::ExecutionQueue;
use crate::repository::RepositoryError;
use crate::service::JobTransactions;

/// Claims ready jobs and enqueues them
pub struct ReadyJobTrigger {
    server_id: String,
    queue: Arc<ExecutionQueue>,
    transactions: Arc<JobTransactions>,
}

impl ReadyJobTrigger {
    pub fn new(
        server_id: impl Into<String>,
        queue: Arc<ExecutionQueue>,
        transactions: Arc<JobTransactions>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            queue,
            transactions,
        }
    }

    /// Claims and enqueues jobs until the queue is full or nothing is ready
    ///
    /// Returns the number of enqueued jobs.
    pub async fn trigger(&self) -> Result<usize, RepositoryError> {
        let mut enqueued = 0;

        while !self.queue.is_full() {
            let Some(job) = self
                .transactions
                .repository()
                .claim_next_ready(&self.server_id)
                .await?
            else {
                break;
            };

            debug!(job_id = %job.id, "Claimed ready job");
            self.queue.enqueue(job.id).await;
            enqueued += 1;
        }

        if enqueued > 0 {
            info!("Enqueued {} ready job(s)", enqueued);
        } else if self.queue.is_full() {
            debug!("Execution queue full, not claiming jobs");
        }
        Ok(enqueued)
    }
}
