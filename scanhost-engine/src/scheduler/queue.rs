//! Execution queue
//!
//! In-memory registry of the jobs this engine instance executes. Holds at most
//! one task per job id. The registry lock only guards map operations, database
//! and process work always happens after the guard is released.

use chrono::{DateTime, Utc};
use scanhost_core::domain::job::JobState;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::pool::WorkerPool;
use crate::execution::handling::cancellation_request_for;
use crate::execution::{CancelableTask, ExecutionContext, ExecutionUnit, TaskOutcome};

/// Result of a cancel attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    /// No task for the job on this instance
    NotFound,
    /// The task had already finished
    AlreadyDone,
    /// The task was cancelled and the job marked CANCELED
    Cancelled,
    /// The task could not be cancelled
    CancelFailed,
}

/// Monitoring view of the queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_max: usize,
    pub jobs_in_queue: usize,
    pub entries: Vec<QueueEntryStatus>,
}

/// Monitoring view of one queued job
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntryStatus {
    pub job_id: Uuid,
    pub done: bool,
    pub canceled: bool,
    pub created: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub state: Option<JobState>,
}

struct QueueEntry {
    task: Arc<CancelableTask>,
    /// Enqueue order
    sequence: u64,
}

/// Registry of queued and running executions
pub struct ExecutionQueue {
    entries: Mutex<HashMap<Uuid, QueueEntry>>,
    next_sequence: AtomicU64,
    queue_max: usize,
    pool: WorkerPool,
    ctx: Arc<ExecutionContext>,
}

impl ExecutionQueue {
    /// Creates the queue
    ///
    /// # Arguments
    /// * `ctx` - Collaborators handed to every execution unit
    /// * `worker_count` - Executions running at the same time
    /// * `queue_max` - Entries after which the queue reports being full
    pub fn new(ctx: Arc<ExecutionContext>, worker_count: usize, queue_max: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
            queue_max,
            pool: WorkerPool::new(worker_count),
            ctx,
        }
    }

    pub fn queue_max(&self) -> usize {
        self.queue_max
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// True when the number of entries reached the maximum
    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.queue_max
    }

    /// Registers a new execution of the job and submits it to the workers
    ///
    /// An existing entry for the same job is replaced and its task cancelled
    /// before the new one starts.
    pub async fn enqueue(&self, job_id: Uuid) -> Arc<CancelableTask> {
        let task = CancelableTask::new(ExecutionUnit::new(job_id, Arc::clone(&self.ctx)));

        let former = {
            let mut entries = self.lock();
            if entries.len() >= self.queue_max {
                warn!("Execution queue overload: {}/{}", entries.len(), self.queue_max);
            }
            entries.insert(
                job_id,
                QueueEntry {
                    task: Arc::clone(&task),
                    sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
                },
            )
        };

        if let Some(former) = former {
            error!(job_id = %job_id, "Found former task in queue with same job id, cancelling it");
            former.task.cancel(true).await;
            info!(job_id = %job_id, "Cancelled former task");
        }

        debug!(job_id = %job_id, "Added job to execution queue");
        self.pool.submit(Arc::clone(&task));
        task
    }

    /// Cancels the execution of a job on this instance
    ///
    /// Writes the cancel event into the job workspace first so the product can
    /// end itself, then cancels the task. A successful cancel marks the job
    /// CANCELED.
    pub async fn cancel(&self, job_id: Uuid) -> CancelResult {
        debug!(job_id = %job_id, "Try to cancel job if running on this instance");

        let Some(task) = self.task(job_id) else {
            return CancelResult::NotFound;
        };
        if task.is_done() {
            info!(job_id = %job_id, "Cancel skipped, job already done");
            return CancelResult::AlreadyDone;
        }

        self.send_cancel_event(job_id).await;

        if !task.cancel(true).await {
            info!(
                job_id = %job_id,
                "Cancel FAILED: was not able to cancel job, this will be an orphaned cancel request"
            );
            return CancelResult::CancelFailed;
        }

        info!(job_id = %job_id, "Cancel SUCCESSFUL");
        if let Err(e) = self.ctx.transactions.mark_canceled(job_id).await {
            error!(job_id = %job_id, "Marking cancelled job failed: {}", e);
        }
        CancelResult::Cancelled
    }

    async fn send_cancel_event(&self, job_id: Uuid) {
        let request = match self.ctx.transactions.load_configuration_data(job_id).await {
            Ok(data) => cancellation_request_for(&data.configuration),
            Err(e) => {
                warn!(job_id = %job_id, "Using default cancel timing, configuration not readable: {}", e);
                cancellation_request_for(&Default::default())
            }
        };

        if let Err(e) = self.ctx.workspace.send_event(job_id, &request.to_event()) {
            error!(job_id = %job_id, "Sending cancel event failed: {}", e);
        }
    }

    /// Snapshot of all entries with their persisted timing, in enqueue order
    pub async fn status_snapshot(&self) -> QueueStatus {
        let mut tasks: Vec<_> = self
            .lock()
            .values()
            .map(|entry| (entry.sequence, Arc::clone(&entry.task)))
            .collect();
        tasks.sort_by_key(|(sequence, _)| *sequence);

        let mut entries = Vec::with_capacity(tasks.len());
        for (_, task) in tasks {
            let job = match self.ctx.transactions.find(task.job_id()).await {
                Ok(job) => job,
                Err(e) => {
                    debug!(job_id = %task.job_id(), "Status lookup failed: {}", e);
                    None
                }
            };
            entries.push(QueueEntryStatus {
                job_id: task.job_id(),
                done: task.is_done(),
                canceled: task.is_cancelled(),
                created: job.as_ref().map(|j| j.created),
                started: job.as_ref().and_then(|j| j.started),
                state: job.map(|j| j.state),
            });
        }

        QueueStatus {
            queue_max: self.queue_max,
            jobs_in_queue: entries.len(),
            entries,
        }
    }

    /// Tasks that finished, with their outcome
    pub fn completed_entries(&self) -> Vec<(Arc<CancelableTask>, TaskOutcome)> {
        self.lock()
            .values()
            .filter_map(|entry| {
                entry
                    .task
                    .outcome()
                    .map(|outcome| (Arc::clone(&entry.task), outcome))
            })
            .collect()
    }

    /// Removes the entry of the job if it still holds the given task
    ///
    /// Returns `false` when the entry was replaced in the meantime.
    pub fn remove_if_same(&self, task: &Arc<CancelableTask>) -> bool {
        let mut entries = self.lock();
        match entries.get(&task.job_id()) {
            Some(entry) if Arc::ptr_eq(&entry.task, task) => {
                entries.remove(&task.job_id());
                true
            }
            _ => false,
        }
    }

    /// Hands unfinished jobs back for another instance
    ///
    /// Every job whose task is not done is reset to READY_TO_START in one
    /// write. Must run after the reconciliation watcher has stopped.
    pub async fn shutdown(&self) -> usize {
        self.pool.close();

        let unfinished: Vec<Uuid> = self
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.task.is_done())
            .map(|(id, _)| *id)
            .collect();

        info!("Handling shutdown for {} job(s) in queue", unfinished.len());
        if unfinished.is_empty() {
            return 0;
        }

        match self
            .ctx
            .transactions
            .force_state_reset(&unfinished, JobState::ReadyToStart)
            .await
        {
            Ok(changed) => {
                info!("Reset {} job(s) to {}", changed, JobState::ReadyToStart);
            }
            Err(e) => error!("Resetting unfinished jobs failed: {}", e),
        }
        unfinished.len()
    }

    fn task(&self, job_id: Uuid) -> Option<Arc<CancelableTask>> {
        self.lock().get(&job_id).map(|entry| Arc::clone(&entry.task))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, QueueEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use crate::execution::process::ProcessHandle;
    use crate::execution::unit::tests::{FakeLauncher, FakeProcess, Fixture};
    use crate::workspace::WorkspaceService;
    use scanhost_core::domain::event::ExecutionEventType;
    use scanhost_core::domain::job::JobConfiguration;
    use scanhost_core::params::PARAM_KEY_CANCEL_MAXIMUM_WAITTIME_SECONDS;
    use std::time::Duration;

    pub(crate) async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn scanner() -> JobConfiguration {
        JobConfiguration::new("scanner")
    }

    #[tokio::test]
    async fn test_is_full_at_queue_max() {
        let process = FakeProcess::running();
        let fixture = Fixture::new(FakeLauncher::new(process.clone()), Some("/bin/sh"));
        let queue = ExecutionQueue::new(fixture.ctx.clone(), 1, 2);

        queue.enqueue(fixture.job(scanner()).await).await;
        assert!(!queue.is_full());
        queue.enqueue(fixture.job(scanner()).await).await;
        assert!(queue.is_full());
        assert_eq!(queue.len(), 2);

        process.exit();
    }

    #[tokio::test]
    async fn test_second_enqueue_replaces_and_cancels_former() {
        let process = FakeProcess::running();
        let fixture = Fixture::new(FakeLauncher::new(process.clone()), Some("/bin/sh"));
        let queue = ExecutionQueue::new(fixture.ctx.clone(), 2, 10);
        let job_id = fixture.job(scanner()).await;

        let former = queue.enqueue(job_id).await;
        let current = queue.enqueue(job_id).await;

        assert!(former.is_done());
        assert!(!Arc::ptr_eq(&former, &current));
        assert_eq!(queue.len(), 1);
        assert!(!queue.remove_if_same(&former));

        process.exit();
        wait_for(|| current.is_done()).await;
        assert!(queue.remove_if_same(&current));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let fixture = Fixture::new(FakeLauncher::new(FakeProcess::running()), Some("/bin/sh"));
        let queue = ExecutionQueue::new(fixture.ctx.clone(), 1, 10);

        assert_eq!(queue.cancel(Uuid::new_v4()).await, CancelResult::NotFound);
    }

    #[tokio::test]
    async fn test_cancel_running_job_marks_it_canceled() {
        let process = FakeProcess::running();
        let launcher = FakeLauncher::new(process.clone());
        let fixture = Fixture::new(launcher.clone(), Some("/bin/sh"));
        let queue = ExecutionQueue::new(fixture.ctx.clone(), 1, 10);
        let job_id = fixture
            .job(scanner().with_parameter(PARAM_KEY_CANCEL_MAXIMUM_WAITTIME_SECONDS, "0"))
            .await;

        let task = queue.enqueue(job_id).await;
        wait_for(|| launcher.launches.load(Ordering::SeqCst) == 1).await;

        assert_eq!(queue.cancel(job_id).await, CancelResult::Cancelled);
        assert!(!process.is_alive());
        assert!(task.is_done());

        let job = fixture.repository.get(job_id).unwrap();
        assert_eq!(job.state, JobState::Canceled);
        assert!(job.ended.is_some());

        assert_eq!(queue.cancel(job_id).await, CancelResult::AlreadyDone);
    }

    #[tokio::test]
    async fn test_cancel_writes_event_before_cancelling() {
        let fixture = Fixture::new(FakeLauncher::new(FakeProcess::running()), Some("/bin/sh"))
            .with_auto_clean_disabled();
        let ctx = fixture.ctx.clone();
        let queue = ExecutionQueue::new(ctx.clone(), 1, 10);
        let job_id = fixture.job(scanner()).await;

        queue.enqueue(job_id).await;
        assert_eq!(queue.cancel(job_id).await, CancelResult::Cancelled);

        let event = ctx
            .workspace
            .fetch_event(job_id, ExecutionEventType::CancelRequested)
            .unwrap();
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn test_status_snapshot_reports_entries() {
        let process = FakeProcess::running();
        let fixture = Fixture::new(FakeLauncher::new(process.clone()), Some("/bin/sh"));
        let queue = ExecutionQueue::new(fixture.ctx.clone(), 1, 7);
        let first = fixture.job(scanner()).await;
        let second = fixture.job(scanner()).await;

        queue.enqueue(first).await;
        queue.enqueue(second).await;
        wait_for(|| fixture.repository.get(first).unwrap().state == JobState::Running).await;

        let status = queue.status_snapshot().await;
        assert_eq!(status.queue_max, 7);
        assert_eq!(status.jobs_in_queue, 2);
        assert_eq!(status.entries[0].job_id, first);
        assert_eq!(status.entries[0].state, Some(JobState::Running));
        assert!(status.entries[0].started.is_some());
        assert_eq!(status.entries[1].job_id, second);
        assert!(!status.entries[1].done);

        process.exit();
    }

    #[tokio::test]
    async fn test_shutdown_resets_only_unfinished_jobs() {
        let process = FakeProcess::running();
        let fixture = Fixture::new(FakeLauncher::new(process.clone()), Some("/bin/sh"));
        let queue = ExecutionQueue::new(fixture.ctx.clone(), 2, 10);
        let finished = fixture.job(scanner()).await;
        let running = fixture.job(scanner()).await;

        let finished_task = queue.enqueue(finished).await;
        finished_task.complete(TaskOutcome::Completed(
            scanhost_core::domain::execution::ExecutionResult::new(0, None),
        ));
        queue.enqueue(running).await;
        wait_for(|| fixture.repository.get(running).unwrap().state == JobState::Running).await;

        assert_eq!(queue.shutdown().await, 1);

        assert_eq!(
            fixture.repository.get(running).unwrap().state,
            JobState::ReadyToStart
        );
        assert_ne!(
            fixture.repository.get(finished).unwrap().state,
            JobState::ReadyToStart
        );
        process.exit();
    }
}
