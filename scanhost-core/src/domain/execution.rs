//! Execution types
//!
//! Values produced by a single execution of a job. They are not persisted as
//! such; the engine maps them onto the job row.

use serde::{Deserialize, Serialize};

use super::job::JobState;

/// Result of one execution unit run
///
/// Immutable once built. Any exit code other than 0 makes the result failed,
/// regardless of the failed flag it was built with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    exit_code: i32,
    failed: bool,
    canceled: bool,
    encryption_failure: bool,
    result: Option<String>,
}

impl ExecutionResult {
    /// Creates a result for the given exit code and result text
    pub fn new(exit_code: i32, result: Option<String>) -> Self {
        Self {
            exit_code,
            result,
            ..Default::default()
        }
    }

    pub fn with_failed(mut self, failed: bool) -> Self {
        self.failed = failed;
        self
    }

    pub fn with_canceled(mut self, canceled: bool) -> Self {
        self.canceled = canceled;
        self
    }

    pub fn with_encryption_failure(mut self, encryption_failure: bool) -> Self {
        self.encryption_failure = encryption_failure;
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn is_failed(&self) -> bool {
        self.failed || self.exit_code != 0
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn is_encryption_failure(&self) -> bool {
        self.encryption_failure
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// State the job row gets once this result is reconciled
    pub fn terminal_state(&self) -> JobState {
        if self.canceled {
            JobState::Canceled
        } else if self.is_failed() {
            JobState::Failed
        } else {
            JobState::Done
        }
    }
}

/// Stream and metadata text harvested from the workspace
///
/// Written to the job row whether or not the job is done, so callers can
/// observe partial output of a running job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionData {
    pub output_stream: Option<String>,
    pub error_stream: Option<String>,
    pub meta_data: Option<String>,
}
