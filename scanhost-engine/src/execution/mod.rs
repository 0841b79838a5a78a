//! Job execution
//!
//! Everything needed to run one job:
//! - Environment: sanitized environment of the launched product
//! - Process: OS process handle and launcher
//! - Handling: product timeout and cancellation timing of a job
//! - Unit: the execution of one job from workspace preparation to result
//! - Task: cancelable wrapper observed by queue and watcher

pub mod context;
pub mod environment;
pub mod handling;
pub mod process;
pub mod task;
pub mod unit;

pub use context::ExecutionContext;
pub use handling::{ExecutionError, ProductTimeouts};
pub use process::{LaunchSpec, OsProcessLauncher, ProcessHandle, ProcessLauncher};
pub use task::{CancelableTask, TaskOutcome};
pub use unit::{CancelPreparation, ExecutionUnit};
