//! Scheduler layer for the engine
//!
//! Owns the in-memory execution queue and the periodic tasks around it:
//! - Trigger: claims ready jobs into the queue
//! - Watcher: reconciles finished executions into the job rows
//! - Cancel requests: cancels jobs an operator asked to stop

pub mod cancel_requests;
pub mod pool;
pub mod queue;
pub mod trigger;
pub mod watcher;

pub use cancel_requests::CancelRequestService;
pub use pool::WorkerPool;
pub use queue::{CancelResult, ExecutionQueue, QueueEntryStatus, QueueStatus};
pub use trigger::ReadyJobTrigger;
pub use watcher::ReconciliationWatcher;

use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs `tick` every `period` after `initial_delay` until `shutdown` fires
///
/// Ticks never overlap, a slow tick delays the next one.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    initial_delay: Duration,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        info!("Starting {} (initial delay: {:?}, period: {:?})", name, initial_delay, period);

        let mut interval = time::interval_at(time::Instant::now() + initial_delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    debug!("Running {}", name);
                    tick().await;
                }
            }
        }

        info!("Stopped {}", name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_periodic_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let handle = spawn_periodic(
            "counter",
            Duration::from_millis(200),
            Duration::from_millis(20),
            shutdown.clone(),
            {
                let ticks = ticks.clone();
                move || {
                    let ticks = ticks.clone();
                    async move {
                        ticks.fetch_add(1, Ordering::SeqCst);
                    }
                }
            },
        );

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        while ticks.load(Ordering::SeqCst) < 3 {
            time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        handle.await.unwrap();

        let stopped_at = ticks.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), stopped_at);
    }
}
