//! Engine assembly
//!
//! Wires repository, workspace, product setup and execution context into the
//! execution queue and starts the periodic tasks around it.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::db;
use crate::execution::{ExecutionContext, OsProcessLauncher, ProductTimeouts};
use crate::product::{FileProductConfig, ProductConfigProvider};
use crate::repository::{JobRepository, PgJobRepository};
use crate::scheduler::{
    CancelRequestService, ExecutionQueue, ReadyJobTrigger, ReconciliationWatcher, spawn_periodic,
};
use crate::service::JobTransactions;
use crate::workspace::{LocalWorkspace, NoopArchiveExtractor};

/// A running engine instance
pub struct Engine {
    queue: Arc<ExecutionQueue>,
    transactions: Arc<JobTransactions>,
    stop_watcher: CancellationToken,
    stop_tasks: CancellationToken,
    watcher: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Connects to the database and starts the engine
    pub async fn start(config: &EngineConfig) -> Result<Self> {
        let pool = db::create_pool(&config.database_url)
            .await
            .context("Failed to connect to database")?;
        info!("Database connection established");

        db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Database migrations completed");

        Self::with_repository(config, Arc::new(PgJobRepository::new(pool)))
    }

    /// Starts the engine on top of the given job repository
    pub fn with_repository(config: &EngineConfig, repository: Arc<dyn JobRepository>) -> Result<Self> {
        let products = FileProductConfig::load(&config.config_file).with_context(|| {
            format!(
                "Failed to load product setup from {}",
                config.config_file.display()
            )
        })?;
        if products.server_id() != config.server_id {
            anyhow::bail!(
                "Product setup is written for server '{}', but engine runs as '{}'",
                products.server_id(),
                config.server_id
            );
        }
        info!(
            "Loaded {} product setup(s) for server {}",
            products.products().len(),
            config.server_id
        );

        let transactions = Arc::new(JobTransactions::new(repository, config.encryption_pool_id));
        let workspace = Arc::new(LocalWorkspace::new(
            &config.workspace_root,
            config.workspace_auto_clean_disabled,
            Arc::new(NoopArchiveExtractor),
        ));
        let ctx = ExecutionContext::new(
            Arc::clone(&transactions),
            workspace,
            Arc::new(products),
            Arc::new(OsProcessLauncher),
            ProductTimeouts {
                default_minutes: config.product_timeout_minutes,
                max_minutes: config.product_timeout_max_minutes,
            },
        );

        let queue = Arc::new(ExecutionQueue::new(
            ctx,
            config.worker_thread_count,
            config.queue_max,
        ));
        info!(
            "Execution queue ready (workers: {}, queue max: {})",
            config.worker_thread_count, config.queue_max
        );

        let stop_watcher = CancellationToken::new();
        let stop_tasks = CancellationToken::new();

        let watcher = Arc::new(ReconciliationWatcher::new(
            Arc::clone(&queue),
            Arc::clone(&transactions),
        ));
        let watcher = spawn_periodic(
            "reconciliation watcher",
            config.watcher_initial_delay,
            config.watcher_period,
            stop_watcher.clone(),
            move || {
                let watcher = Arc::clone(&watcher);
                async move {
                    watcher.tick().await;
                }
            },
        );

        let trigger = Arc::new(ReadyJobTrigger::new(
            config.server_id.clone(),
            Arc::clone(&queue),
            Arc::clone(&transactions),
        ));
        let trigger = spawn_periodic(
            "ready job trigger",
            config.trigger_period,
            config.trigger_period,
            stop_tasks.clone(),
            move || {
                let trigger = Arc::clone(&trigger);
                async move {
                    if let Err(e) = trigger.trigger().await {
                        error!("Ready job trigger failed: {}", e);
                    }
                }
            },
        );

        let cancel_requests = Arc::new(CancelRequestService::new(
            Arc::clone(&queue),
            Arc::clone(&transactions),
            config.cancel_orphan_after,
        ));
        let cancel_requests = spawn_periodic(
            "cancel request check",
            config.cancel_check_period,
            config.cancel_check_period,
            stop_tasks.clone(),
            move || {
                let cancel_requests = Arc::clone(&cancel_requests);
                async move {
                    if let Err(e) = cancel_requests.handle_requests().await {
                        error!("Cancel request check failed: {}", e);
                    }
                }
            },
        );

        Ok(Self {
            queue,
            transactions,
            stop_watcher,
            stop_tasks,
            watcher,
            tasks: vec![trigger, cancel_requests],
        })
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    pub fn transactions(&self) -> &Arc<JobTransactions> {
        &self.transactions
    }

    /// Stops the engine
    ///
    /// The watcher stops first so no further outcome is reconciled, then the
    /// other periodic tasks. Jobs still executing are handed back as
    /// READY_TO_START for another instance.
    pub async fn shutdown(self) {
        info!("Shutting down engine");

        self.stop_watcher.cancel();
        if let Err(e) = self.watcher.await {
            warn!("Reconciliation watcher ended abnormally: {}", e);
        }

        self.stop_tasks.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Periodic task ended abnormally: {}", e);
            }
        }

        let reset = self.queue.shutdown().await;
        info!("Engine stopped, {} job(s) handed back", reset);
    }
}
