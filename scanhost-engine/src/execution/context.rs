//! Execution context
//!
//! Collaborators shared by all execution units of an engine:
//! - Job transactions for row updates
//! - Workspace service for files of a job
//! - Product configuration for launcher paths and parameters
//! - Process launcher
//! - Timeout limits and the inherited engine environment

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::handling::ProductTimeouts;
use super::process::ProcessLauncher;
use crate::product::ProductConfigProvider;
use crate::service::JobTransactions;
use crate::workspace::WorkspaceService;

/// Interval of the stream refresh check of a running job
pub const STREAM_REFRESH_INTERVAL: Duration = Duration::from_millis(300);

/// Services shared across execution units
pub struct ExecutionContext {
    pub transactions: Arc<JobTransactions>,
    pub workspace: Arc<dyn WorkspaceService>,
    pub products: Arc<dyn ProductConfigProvider>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub timeouts: ProductTimeouts,
    pub stream_refresh_interval: Duration,
    /// Environment the product environment is derived from
    pub inherited_env: HashMap<String, String>,
}

impl ExecutionContext {
    /// Creates a context inheriting the current process environment
    ///
    /// # Arguments
    /// * `transactions` - Job row updates
    /// * `workspace` - Workspace service
    /// * `products` - Product setup provider
    /// * `launcher` - Starts product processes
    /// * `timeouts` - Server limits of the product timeout
    pub fn new(
        transactions: Arc<JobTransactions>,
        workspace: Arc<dyn WorkspaceService>,
        products: Arc<dyn ProductConfigProvider>,
        launcher: Arc<dyn ProcessLauncher>,
        timeouts: ProductTimeouts,
    ) -> Arc<Self> {
        Arc::new(Self {
            transactions,
            workspace,
            products,
            launcher,
            timeouts,
            stream_refresh_interval: STREAM_REFRESH_INTERVAL,
            inherited_env: std::env::vars().collect(),
        })
    }
}
