//! Cancel request handling
//!
//! Jobs in CANCEL_REQUESTED are cancelled in the local queue. Requests no
//! instance can serve anymore are closed as CANCELED.

use chrono::{Duration as ChronoDuration, Utc};
use scanhost_core::domain::job::{Job, JobState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::queue::{CancelResult, ExecutionQueue};
use crate::repository::RepositoryError;
use crate::service::JobTransactions;

/// Serves cancel requests stored on job rows
pub struct CancelRequestService {
    queue: Arc<ExecutionQueue>,
    transactions: Arc<JobTransactions>,
    orphan_after: Duration,
}

impl CancelRequestService {
    /// Creates the service
    ///
    /// # Arguments
    /// * `queue` - Local execution queue
    /// * `transactions` - Job row updates
    /// * `orphan_after` - Age after which a request unknown to this instance is closed
    pub fn new(
        queue: Arc<ExecutionQueue>,
        transactions: Arc<JobTransactions>,
        orphan_after: Duration,
    ) -> Self {
        Self {
            queue,
            transactions,
            orphan_after,
        }
    }

    /// Handles all pending cancel requests once
    pub async fn handle_requests(&self) -> Result<usize, RepositoryError> {
        let requested = self
            .transactions
            .repository()
            .find_in_state(JobState::CancelRequested)
            .await?;

        if requested.is_empty() {
            return Ok(0);
        }

        debug!("Found {} cancel request(s)", requested.len());
        for job in &requested {
            self.handle_request(job).await;
        }
        Ok(requested.len())
    }

    async fn handle_request(&self, job: &Job) {
        match self.queue.cancel(job.id).await {
            CancelResult::Cancelled | CancelResult::AlreadyDone => {}
            CancelResult::CancelFailed => {
                warn!(job_id = %job.id, "Cancel failed, closing orphaned request");
                self.close(job).await;
            }
            CancelResult::NotFound => {
                if self.is_orphan(job) {
                    info!(
                        job_id = %job.id,
                        "Cancel request older than {:?} and job not running here, closing it",
                        self.orphan_after
                    );
                    self.close(job).await;
                } else {
                    debug!(job_id = %job.id, "Job not in local queue, another instance may serve it");
                }
            }
        }
    }

    fn is_orphan(&self, job: &Job) -> bool {
        let Ok(threshold) = ChronoDuration::from_std(self.orphan_after) else {
            return false;
        };
        Utc::now() - job.created > threshold
    }

    async fn close(&self, job: &Job) {
        if let Err(e) = self.transactions.mark_canceled(job.id).await {
            error!(job_id = %job.id, "Closing cancel request failed: {}", e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::execution::process::ProcessHandle;
    use crate::execution::unit::tests::{FakeLauncher, FakeProcess, Fixture};
    use crate::repository::JobRepository;
    use crate::scheduler::queue::tests::wait_for;
    use scanhost_core::domain::job::JobConfiguration;
    use std::sync::atomic::Ordering;

    async fn requested_job(fixture: &Fixture, age: ChronoDuration) -> Job {
        let mut job = Job::new("cluster", "alice", &JobConfiguration::new("scanner"));
        job.state = JobState::CancelRequested;
        job.created = Utc::now() - age;
        fixture.repository.insert(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_old_unknown_request_is_closed() {
        let fixture = Fixture::new(FakeLauncher::new(FakeProcess::running()), Some("/bin/sh"));
        let queue = Arc::new(ExecutionQueue::new(fixture.ctx.clone(), 1, 10));
        let service = CancelRequestService::new(
            queue,
            fixture.ctx.transactions.clone(),
            Duration::from_secs(3600),
        );

        let old = requested_job(&fixture, ChronoDuration::hours(2)).await;
        let fresh = requested_job(&fixture, ChronoDuration::minutes(5)).await;

        assert_eq!(service.handle_requests().await.unwrap(), 2);

        assert_eq!(fixture.repository.get(old.id).unwrap().state, JobState::Canceled);
        assert_eq!(
            fixture.repository.get(fresh.id).unwrap().state,
            JobState::CancelRequested
        );
    }

    #[tokio::test]
    async fn test_running_job_is_cancelled() {
        let process = FakeProcess::running();
        let launcher = FakeLauncher::new(process.clone());
        let fixture = Fixture::new(launcher.clone(), Some("/bin/sh"));
        let queue = Arc::new(ExecutionQueue::new(fixture.ctx.clone(), 1, 10));
        let service = CancelRequestService::new(
            queue.clone(),
            fixture.ctx.transactions.clone(),
            Duration::from_secs(3600),
        );

        let job_id = fixture.job(JobConfiguration::new("scanner")).await;
        let task = queue.enqueue(job_id).await;
        wait_for(|| launcher.launches.load(Ordering::SeqCst) == 1).await;

        let mut job = fixture.repository.get(job_id).unwrap();
        job.state = JobState::CancelRequested;
        fixture.repository.save(&job).await.unwrap();

        assert_eq!(service.handle_requests().await.unwrap(), 1);

        assert!(task.is_cancelled() || !process.is_alive());
        assert_eq!(fixture.repository.get(job_id).unwrap().state, JobState::Canceled);
    }

    #[tokio::test]
    async fn test_nothing_requested() {
        let fixture = Fixture::new(FakeLauncher::new(FakeProcess::running()), Some("/bin/sh"));
        let queue = Arc::new(ExecutionQueue::new(fixture.ctx.clone(), 1, 10));
        let service = CancelRequestService::new(
            queue,
            fixture.ctx.transactions.clone(),
            Duration::from_secs(3600),
        );

        assert_eq!(service.handle_requests().await.unwrap(), 0);
    }
}
