//! Scanhost execution engine
//!
//! Runs external scanner products for queued jobs and reconciles their outcome
//! into the job store.
//!
//! Architecture:
//! - Configuration: engine settings from the environment, product setup file
//! - Repository: job row persistence (PostgreSQL or in-memory)
//! - Service: transactional job updates with optimistic-lock retries
//! - Workspace: per-job folders, events and message files
//! - Execution: environment building, process handling, execution units and
//!   cancelable tasks
//! - Scheduler: worker pool, execution queue, reconciliation watcher and the
//!   periodic trigger and cancel-request tasks

pub mod config;
pub mod db;
pub mod engine;
pub mod execution;
pub mod product;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod service;
#[cfg(unix)]
pub mod shutdown;
pub mod workspace;

pub use config::EngineConfig;
pub use engine::Engine;
