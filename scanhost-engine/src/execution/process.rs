//! OS process handling
//!
//! Thin wrapper over a launched product process. The execution unit only sees
//! the [`ProcessHandle`] trait so it can be driven by fakes in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::debug;

/// Interval between liveness polls while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound for reaping a killed process
const REAP_TIMEOUT: Duration = Duration::from_secs(10);
const SPAWN_ATTEMPTS: usize = 5;

/// A running (or finished) product process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Waits up to `timeout` for the process to exit
    ///
    /// Returns `true` when the process exited, `false` on timeout.
    async fn wait_for(&self, timeout: Duration) -> io::Result<bool>;

    fn is_alive(&self) -> bool;

    /// Kills the process and waits until it is gone
    async fn destroy_forcibly(&self) -> io::Result<()>;

    /// Exit code, `None` while the process is alive
    fn exit_code(&self) -> Option<i32>;
}

/// Everything needed to start a product process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub working_dir: PathBuf,
    /// Complete environment, nothing is inherited
    pub env: HashMap<String, String>,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
}

/// Starts product processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<Arc<dyn ProcessHandle>>;
}

/// Launcher for real OS processes
#[derive(Debug, Default)]
pub struct OsProcessLauncher;

#[async_trait]
impl ProcessLauncher for OsProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<Arc<dyn ProcessHandle>> {
        let mut attempt = 1;
        loop {
            match OsProcess::spawn(spec) {
                Ok(process) => return Ok(Arc::new(process)),
                // the launcher may still be open for writing in a concurrently forked child
                Err(e)
                    if e.kind() == io::ErrorKind::ExecutableFileBusy && attempt < SPAWN_ATTEMPTS =>
                {
                    debug!("Launcher {} busy, retrying", spec.program.display());
                    attempt += 1;
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Handle of a spawned OS process
pub struct OsProcess {
    child: Mutex<Child>,
    exit_code: Mutex<Option<i32>>,
}

impl OsProcess {
    /// Spawns the process with a cleared environment and redirected streams
    pub fn spawn(spec: &LaunchSpec) -> io::Result<Self> {
        let stdout = File::create(&spec.stdout_file)?;
        let stderr = File::create(&spec.stderr_file)?;

        let mut command = Command::new(&spec.program);
        command
            .current_dir(&spec.working_dir)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        let child = command.spawn()?;
        debug!("Started process {:?} for {}", child.id(), spec.program.display());

        Ok(Self {
            child: Mutex::new(child),
            exit_code: Mutex::new(None),
        })
    }

    /// Checks for exit without blocking
    fn poll(&self) -> io::Result<Option<i32>> {
        let mut exit_code = lock(&self.exit_code);
        if exit_code.is_some() {
            return Ok(*exit_code);
        }

        if let Some(status) = lock(&self.child).try_wait()? {
            *exit_code = Some(code_of(status));
        }
        Ok(*exit_code)
    }
}

#[async_trait]
impl ProcessHandle for OsProcess {
    async fn wait_for(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.poll()?.is_some() {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    fn is_alive(&self) -> bool {
        matches!(self.poll(), Ok(None))
    }

    async fn destroy_forcibly(&self) -> io::Result<()> {
        if self.poll()?.is_some() {
            return Ok(());
        }

        lock(&self.child).start_kill()?;

        if !self.wait_for(REAP_TIMEOUT).await? {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "process still alive after kill",
            ));
        }
        Ok(())
    }

    fn exit_code(&self) -> Option<i32> {
        self.poll().ok().flatten()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exit code, signal terminations map to 128 + signal like a shell does
fn code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
