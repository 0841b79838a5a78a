//! Worker pool
//!
//! Runs submitted tasks on the runtime with at most `size` executions at the
//! same time. Tasks wait for a permit in submission order.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::execution::{CancelableTask, TaskOutcome};

/// Result text of a task whose execution panicked
pub const EXECUTION_PANICKED: &str = "Job execution failed";

/// Fixed-size pool executing cancelable tasks
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool running up to `size` executions in parallel
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Number of executions currently holding a worker
    pub fn busy(&self) -> usize {
        self.size.saturating_sub(self.permits.available_permits())
    }

    /// Submits a task, its outcome is recorded on the task itself
    pub fn submit(&self, task: Arc<CancelableTask>) {
        if task.is_done() {
            debug!(job_id = %task.job_id(), "Task already done, not submitted");
            return;
        }

        let permits = Arc::clone(&self.permits);
        let worker_task = Arc::clone(&task);
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return None;
            };
            if worker_task.is_done() {
                // cancelled while waiting for a worker
                return None;
            }
            Some(worker_task.unit().run().await)
        });
        task.bind(handle.abort_handle());

        tokio::spawn(async move {
            match handle.await {
                Ok(Some(result)) => {
                    task.complete(TaskOutcome::Completed(result));
                }
                Ok(None) => {
                    if task.complete(TaskOutcome::Failed("Worker pool closed".to_string())) {
                        warn!(job_id = %task.job_id(), "Worker pool closed before execution");
                    }
                }
                Err(e) if e.is_panic() => {
                    error!(job_id = %task.job_id(), "Execution panicked: {}", e);
                    task.complete(TaskOutcome::Failed(EXECUTION_PANICKED.to_string()));
                }
                Err(_) => {
                    task.complete(TaskOutcome::Cancelled);
                }
            }
        });
    }

    /// Stops handing out workers, waiting tasks end without running
    pub fn close(&self) {
        self.permits.close();
    }
}
