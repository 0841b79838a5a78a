//! Execution events
//!
//! Events are small JSON records written into the job workspace. Launcher
//! scripts may poll for them, e.g. to react on a cancel request before the
//! engine terminates the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Kind of event written into the events folder of a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionEventType {
    CancelRequested,
}

impl ExecutionEventType {
    /// File name of the event inside the events folder
    pub fn file_name(&self) -> &'static str {
        match self {
            ExecutionEventType::CancelRequested => "cancel_requested.json",
        }
    }
}

/// Event record with free-form details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_type: ExecutionEventType,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ExecutionEvent {
    pub fn new(event_type: ExecutionEventType) -> Self {
        Self {
            event_type,
            created: Utc::now(),
            details: BTreeMap::new(),
        }
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

pub const DETAIL_SECONDS_TO_WAIT: &str = "seconds_to_wait";
pub const DETAIL_CHECK_INTERVAL_MILLISECONDS: &str = "check_interval_milliseconds";

/// Lower bound for the process alive check interval
pub const MIN_CHECK_INTERVAL_MILLISECONDS: i64 = 300;
/// Upper bound for the process alive check interval
pub const MAX_CHECK_INTERVAL_MILLISECONDS: i64 = 5_000;
/// Upper bound for the graceful exit period (10 minutes)
pub const MAX_SECONDS_TO_WAIT: i64 = 600;

/// Timing hints for a graceful cancel
///
/// Values come from job or product configuration and are clamped so a broken
/// or malicious configuration cannot stall the engine or flood the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationRequest {
    seconds_to_wait: u64,
    check_interval_milliseconds: u64,
}

impl CancellationRequest {
    pub fn new(seconds_to_wait: i64, check_interval_milliseconds: i64) -> Self {
        let seconds = seconds_to_wait.clamp(0, MAX_SECONDS_TO_WAIT);
        let millis = check_interval_milliseconds
            .clamp(MIN_CHECK_INTERVAL_MILLISECONDS, MAX_CHECK_INTERVAL_MILLISECONDS);

        Self {
            seconds_to_wait: seconds as u64,
            check_interval_milliseconds: millis as u64,
        }
    }

    pub fn seconds_to_wait(&self) -> u64 {
        self.seconds_to_wait
    }

    pub fn check_interval_milliseconds(&self) -> u64 {
        self.check_interval_milliseconds
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.seconds_to_wait)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_milliseconds)
    }

    /// Builds the CANCEL_REQUESTED event carrying these hints
    pub fn to_event(&self) -> ExecutionEvent {
        let mut event = ExecutionEvent::new(ExecutionEventType::CancelRequested);
        event.details.insert(
            DETAIL_SECONDS_TO_WAIT.to_string(),
            self.seconds_to_wait.to_string(),
        );
        event.details.insert(
            DETAIL_CHECK_INTERVAL_MILLISECONDS.to_string(),
            self.check_interval_milliseconds.to_string(),
        );
        event
    }
}
