//! Execution unit
//!
//! Runs a single job: marks it running, prepares the workspace, launches the
//! product, waits for it (bounded by the product timeout), harvests output
//! files and produces an [`ExecutionResult`].
//!
//! Nothing escapes [`ExecutionUnit::run`]: every error becomes a failed result
//! with a generic text that can be searched for in the engine log.

use scanhost_core::domain::execution::{ExecutionData, ExecutionResult};
use scanhost_core::domain::job::JobConfiguration;
use scanhost_core::params::PARAM_KEY_SCRIPTLOG_TO_SERVERLOG;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::context::ExecutionContext;
use super::environment::build_environment;
use super::handling::{ExecutionError, cancellation_request_for, resolve_product_timeout};
use super::process::{LaunchSpec, ProcessHandle};
use crate::workspace::collect_messages;

/// Characters of a stream shown in logs when an execution fails
pub const MAXIMUM_TRUNCATE_CHARS: usize = 1024;

pub const PRODUCT_TIME_OUT: &str = "Product time out";

/// What a cancel did to the unit before the task is cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPreparation {
    /// The process was destroyed or never started, the workspace is cleaned
    Stopped,
    /// The process ended on its own, the unit harvests and cleans up itself
    AlreadyEnded,
    /// The process could not be destroyed
    NotStopped,
}

impl CancelPreparation {
    /// The process is gone after the preparation
    pub fn is_terminated(self) -> bool {
        !matches!(self, Self::NotStopped)
    }
}

/// Work of one job execution
pub struct ExecutionUnit {
    job_id: Uuid,
    ctx: Arc<ExecutionContext>,
    process: Mutex<Option<Arc<dyn ProcessHandle>>>,
    config: Mutex<Option<JobConfiguration>>,
    cancel_requested: AtomicBool,
    cancel_started: AtomicBool,
}

impl ExecutionUnit {
    pub fn new(job_id: Uuid, ctx: Arc<ExecutionContext>) -> Self {
        Self {
            job_id,
            ctx,
            process: Mutex::new(None),
            config: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
            cancel_started: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Executes the job and returns its result
    pub async fn run(&self) -> ExecutionResult {
        let span = info_span!(
            "execution",
            job_id = %self.job_id,
            origin_job_id = tracing::field::Empty
        );
        self.run_in_span().instrument(span).await
    }

    async fn run_in_span(&self) -> ExecutionResult {
        info!("Prepare execution of job {}", self.job_id);

        let mut product_path = None;
        let result = match self.execute(&mut product_path).await {
            Ok(result) => result,
            Err(e) => {
                error!("Execution of job uuid:{} failed: {}", self.job_id, e);
                self.destroy_remaining_process().await;

                ExecutionResult::new(0, Some(generic_failure_text(self.job_id)))
                    .with_failed(true)
                    .with_encryption_failure(e.is_decryption())
            }
        };

        let config = self.configuration();
        self.clean_up_workspace(config.as_ref());

        let canceled = result.is_canceled() || self.cancel_started.load(Ordering::SeqCst);
        let result = result.with_canceled(canceled);

        info!(
            "Finished execution of job {} with exit_code={}, failed={}, canceled={}",
            self.job_id,
            result.exit_code(),
            result.is_failed(),
            canceled
        );

        if result.is_failed() {
            self.log_failure_diagnostics(product_path.as_deref(), result.exit_code())
                .await;
        }

        result
    }

    async fn execute(
        &self,
        product_path: &mut Option<String>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let transactions = &self.ctx.transactions;
        let workspace = &self.ctx.workspace;

        transactions.mark_running(self.job_id).await?;

        let data = transactions.load_configuration_data(self.job_id).await?;
        let config = data.configuration;
        *lock(&self.config) = Some(config.clone());

        if let Some(origin) = config.origin_job_uuid {
            Span::current().record("origin_job_id", tracing::field::display(origin));
        }

        let script_log = config.is_enabled(PARAM_KEY_SCRIPTLOG_TO_SERVERLOG);
        if script_log {
            info!("Script output will be added to the engine log");
        }

        let timeout = resolve_product_timeout(&config, self.ctx.timeouts)?;

        debug!("Start workspace preparation");
        workspace.prepare(self.job_id, &config, data.meta_data.as_deref())?;
        workspace.extract_uploaded_archives(self.job_id, &config)?;

        let product = self
            .ctx
            .products
            .product_setup(&config.product_id)
            .ok_or_else(|| ExecutionError::UnknownProduct(config.product_id.clone()))?;
        *product_path = Some(product.path.clone());

        if !is_executable(Path::new(&product.path)) {
            info!(
                "Launcher {} of product {} is not executable, skipping execution",
                product.path, product.id
            );
            return Ok(ExecutionResult::new(0, None));
        }

        if self.cancel_requested.load(Ordering::SeqCst) {
            info!("Cancel requested before launch, product is not started");
            return Ok(ExecutionResult::new(0, None).with_canceled(true));
        }

        let location = workspace.location_data(self.job_id);
        let spec = LaunchSpec {
            program: product.path.clone().into(),
            working_dir: location.workspace_location.clone(),
            env: build_environment(
                &self.ctx.inherited_env,
                self.job_id,
                &config,
                Some(product),
                &location,
            ),
            stdout_file: workspace.system_out_file(self.job_id),
            stderr_file: workspace.system_error_file(self.job_id),
        };

        info!("Start launcher {} for job {}", product.path, self.job_id);
        let process = self.ctx.launcher.launch(&spec).await?;
        *lock(&self.process) = Some(Arc::clone(&process));

        // a cancel that ran before the process was stored did not see it
        if self.cancel_requested.load(Ordering::SeqCst) {
            info!("Cancel requested while launching, terminating process");
            self.cancel_started.store(true, Ordering::SeqCst);
            process.destroy_forcibly().await?;
        }

        let refresher = self.spawn_stream_refresher();
        let _stop_refresher = refresher.clone().drop_guard();

        debug!(
            "Wait for process, will wait {:?} for result of product {}",
            timeout, config.product_id
        );
        let started = std::time::Instant::now();

        let result = if process.wait_for(timeout).await? {
            let exit_code = process.exit_code().unwrap_or(-1);
            debug!(
                "Process ended with exit code {} after {} ms",
                exit_code,
                started.elapsed().as_millis()
            );
            self.result_from_files(exit_code)
        } else {
            error!(
                "Process did not end in time for job {}, waited {:?} for product {}",
                self.job_id, timeout, config.product_id
            );
            if !self.terminate(&process, &config).await {
                warn!("Process of timed out job {} may still be alive", self.job_id);
            }
            ExecutionResult::new(1, Some(PRODUCT_TIME_OUT.to_string())).with_failed(true)
        };

        refresher.cancel();

        write_execution_data(&self.ctx, self.job_id, script_log).await;
        write_messages(&self.ctx, self.job_id).await;

        Ok(result)
    }

    /// Reads the result file, or builds a failure text from the streams
    fn result_from_files(&self, exit_code: i32) -> ExecutionResult {
        let workspace = &self.ctx.workspace;
        let result_file = workspace.result_file(self.job_id);

        if let Some(content) = read_optional(&result_file) {
            debug!("Result file found");
            return ExecutionResult::new(exit_code, Some(content));
        }

        debug!("Result file not found, using output and error streams as result");
        let mut text = format!("Result file not found at {}", result_file.display());

        let output = read_optional(&workspace.system_out_file(self.job_id));
        if let Some(output) = &output {
            text.push_str("\nOutput:\n");
            text.push_str(output);
        }
        let errors = read_optional(&workspace.system_error_file(self.job_id));
        if let Some(errors) = &errors {
            text.push_str("\nErrors:\n");
            text.push_str(errors);
        }

        error!(
            "Execution of job {} created no result file!\n\nError stream (first {} chars):\n{}\n\nOutput stream (first {} chars):\n{}",
            self.job_id,
            MAXIMUM_TRUNCATE_CHARS,
            errors
                .as_deref()
                .map(|e| shrink_to(e, MAXIMUM_TRUNCATE_CHARS))
                .unwrap_or_default(),
            MAXIMUM_TRUNCATE_CHARS,
            output
                .as_deref()
                .map(|o| shrink_to(o, MAXIMUM_TRUNCATE_CHARS))
                .unwrap_or_default(),
        );

        ExecutionResult::new(exit_code, Some(text)).with_failed(true)
    }

    /// Stops the running process before the task is cancelled
    ///
    /// Waits for the process to end itself when the job allows a grace period,
    /// then destroys it and cleans the workspace. A process that already ended
    /// is left to the running unit, which still persists its data and cleans
    /// the workspace.
    pub async fn prepare_for_cancel(&self) -> CancelPreparation {
        info!(job_id = %self.job_id, "Prepare cancel of job");
        self.cancel_requested.store(true, Ordering::SeqCst);

        let process = lock(&self.process).clone();
        let Some(process) = process else {
            info!(job_id = %self.job_id, "No process started, only cleaning up");
            let config = self.configuration_for_cleanup().await;
            self.clean_up_workspace(config.as_ref());
            return CancelPreparation::Stopped;
        };

        if !process.is_alive() {
            info!(job_id = %self.job_id, "Process is no longer alive, execution finishes by itself");
            return CancelPreparation::AlreadyEnded;
        }

        self.cancel_started.store(true, Ordering::SeqCst);

        let config = self.configuration_for_cleanup().await;
        let terminated = self
            .terminate(&process, &config.clone().unwrap_or_default())
            .await;
        self.clean_up_workspace(config.as_ref());

        if terminated {
            CancelPreparation::Stopped
        } else {
            CancelPreparation::NotStopped
        }
    }

    /// Gives the process its grace period, then kills it
    async fn terminate(&self, process: &Arc<dyn ProcessHandle>, config: &JobConfiguration) -> bool {
        let request = cancellation_request_for(config);

        if request.seconds_to_wait() > 0 {
            info!(
                job_id = %self.job_id,
                "Giving process up to {} seconds to end itself, checking every {} ms",
                request.seconds_to_wait(),
                request.check_interval_milliseconds()
            );
            let started = std::time::Instant::now();
            while started.elapsed() < request.grace_period() && process.is_alive() {
                tokio::time::sleep(request.check_interval()).await;
            }
        }

        if !process.is_alive() {
            info!(job_id = %self.job_id, "Process has terminated itself");
            return true;
        }

        info!(job_id = %self.job_id, "Process still alive, destroying it");
        match process.destroy_forcibly().await {
            Ok(()) => true,
            Err(e) => {
                error!(job_id = %self.job_id, "Failed to destroy process: {}", e);
                false
            }
        }
    }

    async fn destroy_remaining_process(&self) {
        let process = lock(&self.process).clone();
        if let Some(process) = process.filter(|p| p.is_alive()) {
            if let Err(e) = process.destroy_forcibly().await {
                error!("Failed to destroy process after error: {}", e);
            }
        }
    }

    fn configuration(&self) -> Option<JobConfiguration> {
        lock(&self.config).clone()
    }

    /// Configuration used for workspace cleanup during a cancel
    async fn configuration_for_cleanup(&self) -> Option<JobConfiguration> {
        if let Some(config) = self.configuration() {
            return Some(config);
        }

        match self
            .ctx
            .transactions
            .load_configuration_data(self.job_id)
            .await
        {
            Ok(data) => Some(data.configuration),
            Err(e) => {
                warn!(job_id = %self.job_id, "Cannot load configuration for cleanup: {}", e);
                None
            }
        }
    }

    fn clean_up_workspace(&self, config: Option<&JobConfiguration>) {
        let workspace = &self.ctx.workspace;
        if workspace.is_auto_clean_disabled() {
            info!(
                "Auto cleanup is disabled, keeping files at {}",
                workspace.workspace_folder(self.job_id).display()
            );
            return;
        }

        match workspace.cleanup(self.job_id, config) {
            Ok(()) => debug!(job_id = %self.job_id, "Workspace cleanup done"),
            Err(e) => error!(job_id = %self.job_id, "Workspace cleanup failed: {}", e),
        }
    }

    /// Persists stream data early whenever a refresh was requested
    fn spawn_stream_refresher(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let stopped = token.clone();
        let ctx = Arc::clone(&self.ctx);
        let job_id = self.job_id;

        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = stopped.cancelled() => break,
                        _ = tokio::time::sleep(ctx.stream_refresh_interval) => {}
                    }

                    match ctx.transactions.is_stream_update_necessary(job_id).await {
                        Ok(true) => write_execution_data(&ctx, job_id, false).await,
                        Ok(false) => {}
                        Err(e) => debug!("Stream refresh check failed: {}", e),
                    }
                }
            }
            .instrument(Span::current()),
        );

        token
    }

    async fn log_failure_diagnostics(&self, product_path: Option<&str>, exit_code: i32) {
        let job = match self.ctx.transactions.find(self.job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!("Cannot load streams of failed job {}: {}", self.job_id, e);
                None
            }
        };
        let (errors, output) = job
            .map(|job| (job.error_stream_text, job.output_stream_text))
            .unwrap_or_default();

        error!(
            "Execution of job {} failed!\n\nProduct path: {}\nExit code   : {}\n\nError stream (last {} chars):\n{}\n\nOutput stream (last {} chars):\n{}",
            self.job_id,
            product_path.unwrap_or("none"),
            exit_code,
            MAXIMUM_TRUNCATE_CHARS,
            tail(errors.as_deref().unwrap_or_default(), MAXIMUM_TRUNCATE_CHARS),
            MAXIMUM_TRUNCATE_CHARS,
            tail(output.as_deref().unwrap_or_default(), MAXIMUM_TRUNCATE_CHARS),
        );
    }
}

/// Reads stream and metadata files and stores them on the job row
async fn write_execution_data(ctx: &ExecutionContext, job_id: Uuid, script_log: bool) {
    let workspace = &ctx.workspace;
    let data = ExecutionData {
        output_stream: read_optional(&workspace.system_out_file(job_id)),
        error_stream: read_optional(&workspace.system_error_file(job_id)),
        meta_data: read_optional(&workspace.meta_data_file(job_id)),
    };

    if let Err(e) = ctx.transactions.update_execution_data(job_id, &data).await {
        error!("Writing execution data of job {} failed: {}", job_id, e);
    }

    if script_log {
        info!(
            "Script output of job {}\nOutput stream:\n{}\n\nError stream:\n{}\nEnd of script output of job {}",
            job_id,
            data.output_stream.as_deref().unwrap_or_default(),
            data.error_stream.as_deref().unwrap_or_default(),
            job_id
        );
    }
}

async fn write_messages(ctx: &ExecutionContext, job_id: Uuid) {
    let messages = collect_messages(&ctx.workspace.messages_folder(job_id));
    if messages.is_empty() {
        debug!("No product messages found for job {}", job_id);
        return;
    }

    if let Err(e) = ctx.transactions.update_messages(job_id, &messages).await {
        error!("Writing {} message(s) of job {} failed: {}", messages.len(), job_id, e);
    }
}

fn generic_failure_text(job_id: Uuid) -> String {
    format!(
        "Execution of job uuid:{} failed. Please look into the engine logs for details and search for former string.",
        job_id
    )
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            error!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// First `max` characters, marked with `...` when cut
fn shrink_to(content: &str, max: usize) -> String {
    if content.chars().count() < max {
        return content.to_string();
    }
    let mut shrunk: String = content.chars().take(max.saturating_sub(3)).collect();
    shrunk.push_str("...");
    shrunk
}

/// Last `max` characters
fn tail(content: &str, max: usize) -> &str {
    if max == 0 {
        return "";
    }
    match content.char_indices().rev().nth(max - 1) {
        Some((index, _)) => &content[index..],
        None => content,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use crate::execution::handling::ProductTimeouts;
    use crate::execution::process::{OsProcessLauncher, ProcessLauncher};
    use crate::product::FileProductConfig;
    use crate::repository::{InMemoryJobRepository, JobRepository};
    use crate::scheduler::queue::tests::wait_for;
    use crate::service::JobTransactions;
    use crate::workspace::{LocalWorkspace, NoopArchiveExtractor, WorkspaceService};
    use async_trait::async_trait;
    use scanhost_core::domain::job::{Job, JobState};
    use scanhost_core::domain::product::{ProductSetup, ServerConfiguration};
    use scanhost_core::params::PARAM_KEY_PRODUCT_TIMEOUT_MINUTES;
    use std::collections::HashMap;
    use std::io;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Process that runs until destroyed, or exits right away
    pub(crate) struct FakeProcess {
        alive: AtomicBool,
        exit_code: i32,
        /// `wait_for` reports a timeout immediately instead of waiting
        report_timeout: bool,
        /// `wait_for` returns only after this delay, even for an ended process
        linger: Duration,
    }

    impl FakeProcess {
        pub(crate) fn running() -> Arc<Self> {
            Arc::new(Self {
                alive: AtomicBool::new(true),
                exit_code: 0,
                report_timeout: false,
                linger: Duration::ZERO,
            })
        }

        pub(crate) fn hanging() -> Arc<Self> {
            Arc::new(Self {
                alive: AtomicBool::new(true),
                exit_code: 0,
                report_timeout: true,
                linger: Duration::ZERO,
            })
        }

        /// Already ended, but the unit only notices after `linger`
        pub(crate) fn ended_lingering(linger: Duration) -> Arc<Self> {
            Arc::new(Self {
                alive: AtomicBool::new(false),
                exit_code: 0,
                report_timeout: false,
                linger,
            })
        }

        pub(crate) fn exit(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProcessHandle for FakeProcess {
        async fn wait_for(&self, timeout: Duration) -> io::Result<bool> {
            if self.report_timeout {
                return Ok(!self.is_alive());
            }
            if !self.linger.is_zero() {
                tokio::time::sleep(self.linger).await;
            }
            let started = std::time::Instant::now();
            while self.is_alive() {
                if started.elapsed() >= timeout {
                    return Ok(false);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(true)
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn destroy_forcibly(&self) -> io::Result<()> {
            self.exit();
            Ok(())
        }

        fn exit_code(&self) -> Option<i32> {
            (!self.is_alive()).then_some(self.exit_code)
        }
    }

    /// Hands out the same fake process for every launch
    pub(crate) struct FakeLauncher {
        pub(crate) process: Arc<FakeProcess>,
        pub(crate) launches: AtomicUsize,
    }

    impl FakeLauncher {
        pub(crate) fn new(process: Arc<FakeProcess>) -> Arc<Self> {
            Arc::new(Self {
                process,
                launches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn launch(&self, _spec: &LaunchSpec) -> io::Result<Arc<dyn ProcessHandle>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(self.process.clone())
        }
    }

    pub(crate) struct Fixture {
        pub(crate) dir: TempDir,
        pub(crate) repository: Arc<InMemoryJobRepository>,
        pub(crate) ctx: Arc<ExecutionContext>,
    }

    impl Fixture {
        /// Context whose single product "scanner" runs the given launcher path
        pub(crate) fn new(launcher: Arc<dyn ProcessLauncher>, product_path: Option<&str>) -> Self {
            let dir = TempDir::new().unwrap();
            let path = match product_path {
                Some(path) => path.to_string(),
                None => dir.path().join("launch.sh").to_string_lossy().into_owned(),
            };
            let products = FileProductConfig::from_configuration(ServerConfiguration {
                server_id: "cluster".to_string(),
                products: vec![ProductSetup {
                    id: "scanner".to_string(),
                    path,
                    ..Default::default()
                }],
            })
            .unwrap();

            let repository = Arc::new(InMemoryJobRepository::new());
            let transactions = Arc::new(JobTransactions::new(repository.clone(), 0));
            let workspace = Arc::new(LocalWorkspace::new(
                dir.path(),
                false,
                Arc::new(NoopArchiveExtractor),
            ));

            let ctx = Arc::new(ExecutionContext {
                transactions,
                workspace,
                products: Arc::new(products),
                launcher,
                timeouts: ProductTimeouts::default(),
                stream_refresh_interval: Duration::from_millis(20),
                inherited_env: HashMap::from([(
                    "PATH".to_string(),
                    "/usr/bin:/bin".to_string(),
                )]),
            });

            Self {
                dir,
                repository,
                ctx,
            }
        }

        /// Same fixture, but workspaces survive the execution
        pub(crate) fn with_auto_clean_disabled(mut self) -> Self {
            let ctx = Arc::clone(&self.ctx);
            self.ctx = Arc::new(ExecutionContext {
                transactions: ctx.transactions.clone(),
                workspace: Arc::new(LocalWorkspace::new(
                    self.dir.path(),
                    true,
                    Arc::new(NoopArchiveExtractor),
                )),
                products: ctx.products.clone(),
                launcher: ctx.launcher.clone(),
                timeouts: ctx.timeouts,
                stream_refresh_interval: ctx.stream_refresh_interval,
                inherited_env: ctx.inherited_env.clone(),
            });
            self
        }

        pub(crate) fn write_launcher(&self, script: &str) {
            let path = self.dir.path().join("launch.sh");
            fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        pub(crate) async fn job(&self, config: JobConfiguration) -> Uuid {
            let mut job = Job::new("cluster", "alice", &config);
            job.state = JobState::Queued;
            self.repository.insert(&job).await.unwrap();
            job.id
        }

        pub(crate) fn unit(&self, job_id: Uuid) -> ExecutionUnit {
            ExecutionUnit::new(job_id, Arc::clone(&self.ctx))
        }
    }

    fn scanner() -> JobConfiguration {
        JobConfiguration::new("scanner")
    }

    #[tokio::test]
    async fn test_result_file_becomes_result_text() {
        let fixture = Fixture::new(Arc::new(OsProcessLauncher), None);
        fixture.write_launcher(
            "echo \"scanning $PDS_JOB_UUID\"\nprintf 'no findings' > \"$PDS_JOB_RESULT_FILE\"\nexit 0",
        );
        let job_id = fixture.job(scanner()).await;

        let result = fixture.unit(job_id).run().await;

        assert!(!result.is_failed());
        assert!(!result.is_canceled());
        assert_eq!(result.result(), Some("no findings"));

        let job = fixture.repository.get(job_id).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started.is_some());
        assert_eq!(
            job.output_stream_text,
            Some(format!("scanning {}\n", job_id))
        );
        assert!(!fixture.ctx.workspace.workspace_folder(job_id).exists());
    }

    #[tokio::test]
    async fn test_missing_result_file_uses_streams_and_fails() {
        let fixture = Fixture::new(Arc::new(OsProcessLauncher), None);
        fixture.write_launcher("echo out\necho err >&2\nexit 0");
        let job_id = fixture.job(scanner()).await;

        let result = fixture.unit(job_id).run().await;

        assert!(result.is_failed());
        let text = result.result().unwrap();
        assert!(text.starts_with("Result file not found at "));
        assert!(text.contains("\nOutput:\nout\n"));
        assert!(text.contains("\nErrors:\nerr\n"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_code_fails() {
        let fixture = Fixture::new(Arc::new(OsProcessLauncher), None);
        fixture.write_launcher("printf 'partial' > \"$PDS_JOB_RESULT_FILE\"\nexit 5");
        let job_id = fixture.job(scanner()).await;

        let result = fixture.unit(job_id).run().await;

        assert!(result.is_failed());
        assert_eq!(result.exit_code(), 5);
        assert_eq!(result.result(), Some("partial"));
    }

    #[tokio::test]
    async fn test_product_messages_are_persisted() {
        let fixture = Fixture::new(Arc::new(OsProcessLauncher), None);
        fixture.write_launcher(
            "echo '{\"type\":\"INFO\",\"text\":\"hello\"}' > \"$PDS_JOB_USER_MESSAGES_FOLDER/1.json\"\n\
             printf 'ok' > \"$PDS_JOB_RESULT_FILE\"",
        );
        let job_id = fixture.job(scanner()).await;

        fixture.unit(job_id).run().await;

        let job = fixture.repository.get(job_id).unwrap();
        assert_eq!(
            job.messages.as_deref(),
            Some(r#"[{"type":"INFO","text":"hello"}]"#)
        );
    }

    #[tokio::test]
    async fn test_timeout_fails_with_product_time_out() {
        let process = FakeProcess::hanging();
        let fixture = Fixture::new(FakeLauncher::new(process.clone()), Some("/bin/sh"));
        let job_id = fixture.job(scanner()).await;

        let result = fixture.unit(job_id).run().await;

        assert!(result.is_failed());
        assert!(!result.is_canceled());
        assert_eq!(result.exit_code(), 1);
        assert_eq!(result.result(), Some(PRODUCT_TIME_OUT));
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_timeout_below_one_minute_never_starts_a_process() {
        let launcher = FakeLauncher::new(FakeProcess::running());
        let fixture = Fixture::new(launcher.clone(), Some("/bin/sh"));
        let job_id = fixture
            .job(scanner().with_parameter(PARAM_KEY_PRODUCT_TIMEOUT_MINUTES, "0"))
            .await;

        let result = fixture.unit(job_id).run().await;

        assert!(result.is_failed());
        assert_eq!(result.result(), Some(generic_failure_text(job_id).as_str()));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_foreign_encryption_pool_is_an_encryption_failure() {
        let fixture = Fixture::new(FakeLauncher::new(FakeProcess::running()), Some("/bin/sh"));
        let mut job = Job::new("cluster", "alice", &scanner());
        job.encryption_pool_id = 3;
        fixture.repository.insert(&job).await.unwrap();

        let result = fixture.unit(job.id).run().await;

        assert!(result.is_failed());
        assert!(result.is_encryption_failure());
    }

    #[tokio::test]
    async fn test_unknown_product_fails() {
        let fixture = Fixture::new(FakeLauncher::new(FakeProcess::running()), Some("/bin/sh"));
        let job_id = fixture.job(JobConfiguration::new("other")).await;

        let result = fixture.unit(job_id).run().await;

        assert!(result.is_failed());
    }

    #[tokio::test]
    async fn test_missing_launcher_skips_execution() {
        let launcher = FakeLauncher::new(FakeProcess::running());
        let fixture = Fixture::new(launcher.clone(), Some("/definitely/not/here.sh"));
        let job_id = fixture.job(scanner()).await;

        let result = fixture.unit(job_id).run().await;

        assert!(!result.is_failed());
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.result(), None);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prepare_for_cancel_destroys_running_process() {
        let process = FakeProcess::running();
        let fixture = Fixture::new(FakeLauncher::new(process.clone()), Some("/bin/sh"));
        let job_id = fixture.job(scanner()).await;
        let unit = Arc::new(fixture.unit(job_id));

        let running = tokio::spawn({
            let unit = Arc::clone(&unit);
            async move { unit.run().await }
        });
        while lock(&unit.process).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(unit.prepare_for_cancel().await, CancelPreparation::Stopped);
        assert!(!process.is_alive());

        let result = running.await.unwrap();
        assert!(result.is_canceled());
    }

    #[tokio::test]
    async fn test_prepare_for_cancel_without_process_succeeds() {
        let fixture = Fixture::new(FakeLauncher::new(FakeProcess::running()), Some("/bin/sh"));
        let job_id = fixture.job(scanner()).await;
        let unit = fixture.unit(job_id);

        assert_eq!(unit.prepare_for_cancel().await, CancelPreparation::Stopped);

        // a later run never launches
        let result = unit.run().await;
        assert!(result.is_canceled());
    }

    #[tokio::test]
    async fn test_requested_stream_refresh_persists_output_while_running() {
        let fixture = Fixture::new(Arc::new(OsProcessLauncher), None);
        fixture.write_launcher(
            "echo progress\n\
             while [ ! -f \"$PDS_JOB_WORKSPACE_LOCATION/stop\" ]; do sleep 0.1; done\n\
             printf 'ok' > \"$PDS_JOB_RESULT_FILE\"",
        );
        let job_id = fixture.job(scanner()).await;
        let unit = Arc::new(fixture.unit(job_id));

        let running = tokio::spawn({
            let unit = Arc::clone(&unit);
            async move { unit.run().await }
        });
        let out_file = fixture.ctx.workspace.system_out_file(job_id);
        wait_for(|| fs::read_to_string(&out_file).is_ok_and(|out| out == "progress\n")).await;
        assert!(fixture.repository.get(job_id).unwrap().output_stream_text.is_none());

        fixture
            .ctx
            .transactions
            .request_stream_refresh(job_id)
            .await
            .unwrap();
        wait_for(|| {
            fixture.repository.get(job_id).unwrap().output_stream_text.as_deref()
                == Some("progress\n")
        })
        .await;
        assert!(!running.is_finished());

        fs::write(
            fixture.ctx.workspace.workspace_folder(job_id).join("stop"),
            "",
        )
        .unwrap();
        let result = running.await.unwrap();
        assert_eq!(result.result(), Some("ok"));
    }

    #[tokio::test]
    async fn test_auto_clean_disabled_keeps_workspace() {
        let fixture = Fixture::new(Arc::new(OsProcessLauncher), None).with_auto_clean_disabled();
        fixture.write_launcher("printf 'kept' > \"$PDS_JOB_RESULT_FILE\"");
        let job_id = fixture.job(scanner()).await;

        let result = fixture.unit(job_id).run().await;

        assert_eq!(result.result(), Some("kept"));
        let result_file = fixture.ctx.workspace.result_file(job_id);
        assert_eq!(fs::read_to_string(result_file).unwrap(), "kept");
    }

    #[tokio::test]
    async fn test_prepare_for_cancel_leaves_ended_process_to_the_unit() {
        let process = FakeProcess::ended_lingering(Duration::from_millis(300));
        let launcher = FakeLauncher::new(process);
        let fixture = Fixture::new(launcher.clone(), Some("/bin/sh"));
        let job_id = fixture.job(scanner()).await;
        let unit = Arc::new(fixture.unit(job_id));

        let running = tokio::spawn({
            let unit = Arc::clone(&unit);
            async move { unit.run().await }
        });
        while lock(&unit.process).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(unit.prepare_for_cancel().await, CancelPreparation::AlreadyEnded);
        assert!(fixture.ctx.workspace.workspace_folder(job_id).exists());

        let result = running.await.unwrap();
        assert!(!result.is_canceled());
        assert!(!fixture.ctx.workspace.workspace_folder(job_id).exists());
    }

    #[test]
    fn test_shrink_and_tail() {
        assert_eq!(shrink_to("short", 10), "short");
        assert_eq!(shrink_to("abcdefghij", 8), "abcde...");
        assert_eq!(tail("abcdefghij", 3), "hij");
        assert_eq!(tail("ab", 3), "ab");
        assert_eq!(tail("äöü", 2), "öü");
    }
}
