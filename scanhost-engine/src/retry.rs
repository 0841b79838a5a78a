//! Bounded retries
//!
//! Writes against the job row may race with other writers. The helper here
//! repeats an operation while its error is classified as retryable.

use std::future::Future;
use tracing::warn;

/// Runs `operation` until it succeeds, fails with a non-retryable error or
/// `max_attempts` attempts were made
///
/// The operation receives the 1-based attempt number. There is no backoff; the
/// loop itself is the only delay.
///
/// # Arguments
/// * `max_attempts` - Total attempts, at least one is always made
/// * `is_retryable` - Classifies an error as worth another attempt
/// * `operation` - The fallible operation
pub async fn retry_when<T, E, F, Fut, P>(
    max_attempts: usize,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                warn!("Attempt {}/{} failed, retrying: {}", attempt, max_attempts, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
