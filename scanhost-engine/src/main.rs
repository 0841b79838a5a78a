//! Scanhost Engine
//!
//! Executes queued scan jobs by launching the configured product for each job
//! and reconciling the outcome into the job store.
//!
//! The engine claims READY_TO_START jobs of its server id, runs them with a
//! bounded number of workers and, on SIGTERM or SIGINT, hands every job that
//! is still executing back as READY_TO_START.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanhost_engine::shutdown::install_shutdown_handler;
use scanhost_engine::{Engine, EngineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanhost_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Scanhost Engine");

    let config = EngineConfig::load()?;
    info!(
        "Loaded configuration: server_id={}, workspace_root={}, config_file={}",
        config.server_id,
        config.workspace_root.display(),
        config.config_file.display()
    );

    let shutdown = install_shutdown_handler().context("Failed to install signal handlers")?;

    let engine = Engine::start(&config).await?;
    info!(
        "Engine initialized (workers: {}, queue max: {})",
        config.worker_thread_count, config.queue_max
    );

    shutdown.cancelled().await;
    engine.shutdown().await;

    Ok(())
}
