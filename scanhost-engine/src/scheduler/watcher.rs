//! Reconciliation watcher
//!
//! Periodically persists the outcome of finished tasks to their job rows and
//! removes them from the execution queue.

use scanhost_core::domain::job::JobState;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::queue::ExecutionQueue;
use crate::execution::{CancelableTask, TaskOutcome};
use crate::service::{FINAL_WRITE_ATTEMPTS, JobTransactions};

/// Writes final job states for completed queue entries
pub struct ReconciliationWatcher {
    queue: Arc<ExecutionQueue>,
    transactions: Arc<JobTransactions>,
}

impl ReconciliationWatcher {
    pub fn new(queue: Arc<ExecutionQueue>, transactions: Arc<JobTransactions>) -> Self {
        Self {
            queue,
            transactions,
        }
    }

    /// Handles every completed entry once
    ///
    /// Returns the number of entries removed from the queue.
    pub async fn tick(&self) -> usize {
        let completed = self.queue.completed_entries();
        if completed.is_empty() {
            return 0;
        }

        debug!("Reconciling {} completed job(s)", completed.len());
        let mut removed = 0;
        for (task, outcome) in completed {
            self.reconcile(&task, outcome).await;
            // removed even when persisting failed, the outcome is not retried later
            if self.queue.remove_if_same(&task) {
                removed += 1;
            }
        }
        removed
    }

    async fn reconcile(&self, task: &Arc<CancelableTask>, outcome: TaskOutcome) {
        let job_id = task.job_id();
        let (state, result) = final_state(outcome);

        match self
            .transactions
            .persist_final_state(job_id, state, result.as_deref())
            .await
        {
            Ok(job) => info!(job_id = %job_id, "Stored final state {}", job.state),
            Err(e) if e.is_not_found() => {
                error!(job_id = %job_id, "Job does no longer exist, but result available, removing it from queue");
            }
            Err(e) => {
                error!(
                    job_id = %job_id,
                    "Was not able to write final state {} even after {} tries: {}",
                    state, FINAL_WRITE_ATTEMPTS, e
                );
            }
        }
    }
}

/// Job state and result text for a task outcome
pub fn final_state(outcome: TaskOutcome) -> (JobState, Option<String>) {
    match outcome {
        TaskOutcome::Cancelled => (JobState::Canceled, None),
        TaskOutcome::Completed(result) => {
            (result.terminal_state(), result.result().map(str::to_string))
        }
        TaskOutcome::Failed(message) => (JobState::Failed, Some(message)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::execution::unit::tests::{FakeLauncher, FakeProcess, Fixture};
    use crate::scheduler::queue::tests::wait_for;
    use scanhost_core::domain::execution::ExecutionResult;
    use scanhost_core::domain::job::JobConfiguration;

    struct Setup {
        fixture: Fixture,
        process: Arc<FakeProcess>,
        queue: Arc<ExecutionQueue>,
        watcher: ReconciliationWatcher,
    }

    fn setup() -> Setup {
        let process = FakeProcess::running();
        let fixture = Fixture::new(FakeLauncher::new(process.clone()), Some("/bin/sh"));
        let queue = Arc::new(ExecutionQueue::new(fixture.ctx.clone(), 2, 10));
        let watcher = ReconciliationWatcher::new(queue.clone(), fixture.ctx.transactions.clone());
        Setup {
            fixture,
            process,
            queue,
            watcher,
        }
    }

    #[test]
    fn test_final_state_mapping() {
        assert_eq!(final_state(TaskOutcome::Cancelled), (JobState::Canceled, None));
        assert_eq!(
            final_state(TaskOutcome::Failed("Job execution failed".to_string())),
            (JobState::Failed, Some("Job execution failed".to_string()))
        );

        let done = ExecutionResult::new(0, Some("ok".to_string()));
        assert_eq!(
            final_state(TaskOutcome::Completed(done)),
            (JobState::Done, Some("ok".to_string()))
        );

        let canceled = ExecutionResult::new(1, None).with_failed(true).with_canceled(true);
        assert_eq!(final_state(TaskOutcome::Completed(canceled)).0, JobState::Canceled);

        let non_zero = ExecutionResult::new(2, None);
        assert_eq!(final_state(TaskOutcome::Completed(non_zero)).0, JobState::Failed);
    }

    #[tokio::test]
    async fn test_running_entries_are_left_alone() {
        let setup = setup();
        let job_id = setup.fixture.job(JobConfiguration::new("scanner")).await;
        setup.queue.enqueue(job_id).await;

        assert_eq!(setup.watcher.tick().await, 0);
        assert_eq!(setup.queue.len(), 1);
        setup.process.exit();
    }

    #[tokio::test]
    async fn test_completed_entry_is_persisted_and_removed() {
        let setup = setup();
        let job_id = setup.fixture.job(JobConfiguration::new("scanner")).await;

        let task = setup.queue.enqueue(job_id).await;
        setup.process.exit();
        wait_for(|| task.is_done()).await;

        assert_eq!(setup.watcher.tick().await, 1);
        assert!(setup.queue.is_empty());

        let job = setup.fixture.repository.get(job_id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.ended.is_some());
        assert!(job.result.unwrap().starts_with("Result file not found at "));
    }

    #[tokio::test]
    async fn test_write_conflicts_are_retried() {
        let setup = setup();
        let job_id = setup.fixture.job(JobConfiguration::new("scanner")).await;
        let task = setup.queue.enqueue(job_id).await;
        task.complete(TaskOutcome::Completed(ExecutionResult::new(0, Some("ok".to_string()))));
        setup.process.exit();
        assert_eq!(setup.queue.completed_entries().len(), 1);

        setup.fixture.repository.inject_save_conflicts(4);
        assert_eq!(setup.watcher.tick().await, 1);

        let job = setup.fixture.repository.get(job_id).unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.result.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_entry_is_removed_even_when_retries_are_exhausted() {
        let setup = setup();
        let job_id = setup.fixture.job(JobConfiguration::new("scanner")).await;
        let task = setup.queue.enqueue(job_id).await;
        task.complete(TaskOutcome::Cancelled);
        setup.process.exit();

        setup.fixture.repository.inject_save_conflicts(FINAL_WRITE_ATTEMPTS);
        assert_eq!(setup.watcher.tick().await, 1);

        assert!(setup.queue.is_empty());
        assert_ne!(
            setup.fixture.repository.get(job_id).unwrap().state,
            JobState::Canceled
        );
        setup.fixture.repository.inject_save_conflicts(0);
    }

    #[tokio::test]
    async fn test_deleted_job_is_dropped() {
        let setup = setup();
        let job_id = setup.fixture.job(JobConfiguration::new("scanner")).await;
        let task = setup.queue.enqueue(job_id).await;
        task.complete(TaskOutcome::Cancelled);
        setup.process.exit();
        setup.fixture.repository.remove(job_id);

        assert_eq!(setup.watcher.tick().await, 1);
        assert!(setup.queue.is_empty());
    }
}
