//! Cancelable task
//!
//! Wraps an execution unit with the completion state observed by the queue and
//! the reconciliation watcher. Cancelling first lets the unit stop its process
//! and clean the workspace, only then the spawned task is aborted.

use scanhost_core::domain::execution::ExecutionResult;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::unit::{CancelPreparation, ExecutionUnit};

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The unit ran to the end and produced a result
    Completed(ExecutionResult),
    /// The task was cancelled before it completed
    Cancelled,
    /// The task ended abnormally (panic)
    Failed(String),
}

#[derive(Debug)]
enum TaskState {
    Pending,
    Finished(TaskOutcome),
}

/// A queued execution that can be cancelled
pub struct CancelableTask {
    unit: Arc<ExecutionUnit>,
    state: Mutex<TaskState>,
    abort: Mutex<Option<AbortHandle>>,
}

impl CancelableTask {
    pub fn new(unit: ExecutionUnit) -> Arc<Self> {
        Arc::new(Self {
            unit: Arc::new(unit),
            state: Mutex::new(TaskState::Pending),
            abort: Mutex::new(None),
        })
    }

    pub fn job_id(&self) -> Uuid {
        self.unit.job_id()
    }

    pub fn unit(&self) -> Arc<ExecutionUnit> {
        Arc::clone(&self.unit)
    }

    pub fn is_done(&self) -> bool {
        matches!(*lock(&self.state), TaskState::Finished(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*lock(&self.state), TaskState::Finished(TaskOutcome::Cancelled))
    }

    /// Outcome once the task is done
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match &*lock(&self.state) {
            TaskState::Pending => None,
            TaskState::Finished(outcome) => Some(outcome.clone()),
        }
    }

    /// Records the outcome, the first one wins
    ///
    /// Returns `false` when the task was already done.
    pub fn complete(&self, outcome: TaskOutcome) -> bool {
        let mut state = lock(&self.state);
        match *state {
            TaskState::Pending => {
                *state = TaskState::Finished(outcome);
                true
            }
            TaskState::Finished(_) => false,
        }
    }

    /// Attaches the spawned task so a cancel can abort it
    pub fn bind(&self, abort: AbortHandle) {
        if self.is_cancelled() {
            abort.abort();
        }
        *lock(&self.abort) = Some(abort);
    }

    /// Cancels the task
    ///
    /// The unit stops its process first. The cancel counts as successful when
    /// either the unit reports the process gone or the task itself could still
    /// be switched to cancelled. When the process already ended on its own the
    /// task is neither marked cancelled nor aborted, so the unit can persist
    /// its data and clean the workspace.
    ///
    /// # Arguments
    /// * `may_interrupt` - Abort the spawned task when it is already running
    pub async fn cancel(&self, may_interrupt: bool) -> bool {
        if self.is_done() {
            debug!(job_id = %self.job_id(), "Task already done, not cancelling");
            return false;
        }

        let preparation = self.unit.prepare_for_cancel().await;
        if preparation == CancelPreparation::AlreadyEnded {
            info!(job_id = %self.job_id(), "Process already ended, execution is left to finish");
            return true;
        }

        let terminated = preparation.is_terminated();
        let handle_cancelled = self.complete(TaskOutcome::Cancelled);

        if handle_cancelled && may_interrupt {
            if let Some(abort) = lock(&self.abort).as_ref() {
                abort.abort();
            }
        }

        info!(
            job_id = %self.job_id(),
            "Cancel finished: process terminated={}, task cancelled={}",
            terminated, handle_cancelled
        );
        terminated || handle_cancelled
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
