//! Per-job execution settings
//!
//! Resolves the product timeout and the cancellation timing of a job from its
//! parameters and the engine defaults.

use scanhost_core::domain::event::CancellationRequest;
use scanhost_core::domain::job::JobConfiguration;
use scanhost_core::params::{
    DEFAULT_CANCEL_CHECK_INTERVAL_MILLISECONDS, DEFAULT_CANCEL_MAXIMUM_WAITTIME_SECONDS,
    PARAM_KEY_CANCEL_CHECK_INTERVAL_MILLISECONDS, PARAM_KEY_CANCEL_MAXIMUM_WAITTIME_SECONDS,
    PARAM_KEY_PRODUCT_TIMEOUT_MINUTES,
};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::repository::RepositoryError;
use crate::workspace::WorkspaceError;

/// Errors ending an execution before or while the product runs
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Engine or job misconfiguration, never retried
    #[error("Configuration problem: {0}")]
    Configuration(String),

    #[error("No product configured for id '{0}'")]
    UnknownProduct(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("Process handling failed: {0}")]
    Process(#[from] std::io::Error),
}

impl ExecutionError {
    pub fn is_decryption(&self) -> bool {
        matches!(self, Self::Repository(e) if e.is_decryption())
    }
}

/// Server side limits of the product timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductTimeouts {
    pub default_minutes: i64,
    pub max_minutes: i64,
}

impl Default for ProductTimeouts {
    fn default() -> Self {
        Self {
            default_minutes: 120,
            max_minutes: 4320,
        }
    }
}

/// Time the engine waits for the product of this job
///
/// A job parameter overrides the server default and is capped at the server
/// maximum. Anything below one minute is rejected.
pub fn resolve_product_timeout(
    config: &JobConfiguration,
    timeouts: ProductTimeouts,
) -> Result<Duration, ExecutionError> {
    let requested = match config.parameter(PARAM_KEY_PRODUCT_TIMEOUT_MINUTES) {
        None => timeouts.default_minutes,
        Some(value) => value.trim().parse::<i64>().unwrap_or_else(|_| {
            warn!(
                "Ignoring invalid {}: '{}'",
                PARAM_KEY_PRODUCT_TIMEOUT_MINUTES, value
            );
            timeouts.default_minutes
        }),
    };

    let minutes = requested.min(timeouts.max_minutes);
    if minutes < 1 {
        return Err(ExecutionError::Configuration(format!(
            "product timeout must be at least 1 minute, but is {}",
            minutes
        )));
    }

    Ok(Duration::from_secs(minutes as u64 * 60))
}

/// Cancellation timing hints of a job, clamped to safe bounds
pub fn cancellation_request_for(config: &JobConfiguration) -> CancellationRequest {
    let seconds = config
        .parameter_as::<i64>(PARAM_KEY_CANCEL_MAXIMUM_WAITTIME_SECONDS)
        .unwrap_or(DEFAULT_CANCEL_MAXIMUM_WAITTIME_SECONDS);
    let millis = config
        .parameter_as::<i64>(PARAM_KEY_CANCEL_CHECK_INTERVAL_MILLISECONDS)
        .unwrap_or(DEFAULT_CANCEL_CHECK_INTERVAL_MILLISECONDS);

    CancellationRequest::new(seconds, millis)
}
