//! Managed service lifecycle
//!
//! This module provides:
//! - `ServiceInstance` - owns one service's child process: start, monitor, stop, restart
//! - `InstanceProbe` - cheap read-only view of an instance's runtime state
//! - `stage_binary` - copies a source binary into storage under a unique name
//! - `resolve_launch_command` - turns a command template into program + args

mod command;
mod staging;

pub use command::{resolve_launch_command, LaunchCommand, BINARY_PLACEHOLDER};
pub use staging::{
    artifact_name, discard_artifact, stage_binary, stage_binary_async, stage_binary_with,
};

use nix::sys::signal::Signal;
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::anchor::DAEMON_MARKER_ENV;
use crate::config::{ExitOutcome, ServiceSpec};
use crate::errors::{DaemonError, Result};
use crate::logs::{expand_date_tokens, open_log_file};
use crate::process::send_signal;

/// Interval at which `stop` polls the running flag
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `stop` waits for the monitor to observe a SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(1);

/// Attempts made when exec fails with ETXTBSY right after staging
const SPAWN_ATTEMPTS: u32 = 3;

/// Exit of a managed process that `stop` did not ask for
#[derive(Debug, Clone)]
pub struct ExitReport {
    pub service_name: String,
    /// Launch generation the exited process belonged to
    pub generation: u64,
    pub outcome: ExitOutcome,
}

/// Runtime state shared between an instance, its monitor task and probes
#[derive(Debug, Default)]
struct InstanceState {
    running: AtomicBool,
    launches: AtomicU64,
    pid: AtomicU32,
}

/// Read-only handle on an instance's runtime state
#[derive(Debug, Clone)]
pub struct InstanceProbe {
    state: Arc<InstanceState>,
}

impl InstanceProbe {
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Number of successful launches so far
    pub fn launches(&self) -> u64 {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Pid of the current (or last) process, if any was launched
    pub fn pid(&self) -> Option<u32> {
        match self.state.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

/// The process behind the current launch
struct LiveProcess {
    pid: u32,
    stop_requested: Arc<AtomicBool>,
}

#[derive(Default)]
struct LogFiles {
    stdout: Option<File>,
    stderr: Option<File>,
}

impl LogFiles {
    /// Flush and close both handles
    fn close(&mut self) {
        for file in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            if let Err(e) = file.sync_all() {
                debug!("Cannot sync log file: {}", e);
            }
        }
    }
}

/// Lifecycle wrapper around one service spec.
///
/// `start`, `stop` and `restart` take `&mut self`: calls on one instance are
/// serialized by the owner, only the running flag is shared with the monitor.
pub struct ServiceInstance {
    spec: ServiceSpec,
    storage_dir: PathBuf,
    grace_period: Duration,
    exit_tx: Option<mpsc::Sender<ExitReport>>,
    state: Arc<InstanceState>,
    artifact: Option<PathBuf>,
    process: Option<LiveProcess>,
    log_files: LogFiles,
}

impl ServiceInstance {
    pub fn new(spec: ServiceSpec, storage_dir: impl Into<PathBuf>, grace_period: Duration) -> Self {
        Self {
            spec,
            storage_dir: storage_dir.into(),
            grace_period,
            exit_tx: None,
            state: Arc::new(InstanceState::default()),
            artifact: None,
            process: None,
            log_files: LogFiles::default(),
        }
    }

    /// Report unexpected exits of this instance's processes on `exit_tx`
    pub fn with_exit_reports(mut self, exit_tx: mpsc::Sender<ExitReport>) -> Self {
        self.exit_tx = Some(exit_tx);
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn probe(&self) -> InstanceProbe {
        InstanceProbe {
            state: self.state.clone(),
        }
    }

    /// Generation of the current launch; bumps on every successful start
    pub fn generation(&self) -> u64 {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Path of the currently staged artifact
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Stage a fresh artifact and launch it.
    ///
    /// Does nothing if the service is already running. On error the instance
    /// stays stopped.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("Service {} is already running, not starting it twice", self.spec.name);
            return Ok(());
        }

        info!("Starting service {}", self.spec.name);

        let artifact =
            stage_binary_async(&self.spec.name, &self.spec.binary_path, &self.storage_dir).await?;

        let Some(launch) = resolve_launch_command(self.spec.command.as_deref(), &artifact) else {
            discard_artifact(&artifact);
            return Err(DaemonError::EmptyCommand(self.spec.name.clone()));
        };

        let mut log_files = LogFiles::default();
        let stdout = self.open_stream("stdout", self.spec.logs.stdout.as_deref(), &mut log_files.stdout);
        let stderr = self.open_stream("stderr", self.spec.logs.stderr.as_deref(), &mut log_files.stderr);

        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .env_remove(DAEMON_MARKER_ENV)
            .envs(&self.spec.environment)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        debug!(
            "Launching service {}: {} {:?}",
            self.spec.name, launch.program, launch.args
        );

        let child = match spawn_with_retry(&mut cmd).await {
            Ok(child) => child,
            Err(source) => {
                error!("Service {} could not be launched: {}", self.spec.name, source);
                discard_artifact(&artifact);
                return Err(DaemonError::ProcessSpawn {
                    service: self.spec.name.clone(),
                    source,
                });
            }
        };

        let Some(pid) = child.id() else {
            error!("Service {} exited before its pid could be read", self.spec.name);
            discard_artifact(&artifact);
            return Err(DaemonError::ProcessSpawn {
                service: self.spec.name.clone(),
                source: std::io::Error::other("process has no pid"),
            });
        };
        let stop_requested = Arc::new(AtomicBool::new(false));

        // Mark running before the monitor exists so a fast exit cannot be overwritten.
        self.state.running.store(true, Ordering::SeqCst);
        self.state.pid.store(pid, Ordering::SeqCst);
        let generation = self.state.launches.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::spawn(monitor_process(
            self.spec.name.clone(),
            generation,
            child,
            self.state.clone(),
            stop_requested.clone(),
            self.exit_tx.clone(),
        ));

        info!("Service {} running with pid {}", self.spec.name, pid);

        self.process = Some(LiveProcess { pid, stop_requested });
        self.log_files.close();
        self.log_files = log_files;
        if let Some(previous) = self.artifact.replace(artifact) {
            discard_artifact(&previous);
        }

        Ok(())
    }

    /// Stop the service: SIGTERM, then SIGKILL once the grace period runs out.
    ///
    /// Log files are closed whatever happens. The staged artifact is kept.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            warn!("Service {} is not running", self.spec.name);
            return;
        }

        let Some(process) = &self.process else {
            warn!("Service {} is marked running without a process", self.spec.name);
            return;
        };

        info!("Stopping service {}", self.spec.name);
        process.stop_requested.store(true, Ordering::SeqCst);
        let pid = process.pid;

        if let Err(e) = send_signal(pid, Signal::SIGTERM) {
            warn!("Error stopping service {}: {}", self.spec.name, e);
        }

        if !self.wait_until_stopped(self.grace_period).await {
            warn!(
                "Service {} did not stop within {:?}, sending SIGKILL",
                self.spec.name, self.grace_period
            );
            match send_signal(pid, Signal::SIGKILL) {
                Ok(()) => {
                    if !self.wait_until_stopped(KILL_WAIT).await {
                        error!("Service {} (pid {}) survived SIGKILL", self.spec.name, pid);
                    }
                }
                Err(e) => error!("Error killing service {}: {}", self.spec.name, e),
            }
        }

        self.log_files.close();
        if !self.is_running() {
            self.process = None;
        }
    }

    /// Stop (if running) then start again
    pub async fn restart(&mut self) -> Result<()> {
        if self.is_running() {
            self.stop().await;
        }
        self.start().await
    }

    async fn wait_until_stopped(&self, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        loop {
            if !self.is_running() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Open a log file for one output stream, falling back to the daemon's own stream
    fn open_stream(&self, label: &str, template: Option<&Path>, handle: &mut Option<File>) -> Stdio {
        let Some(template) = template else {
            return Stdio::inherit();
        };

        let path = expand_date_tokens(template);
        let file = match open_log_file(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "Service {} cannot open {} log file {:?}: {}, using daemon log instead",
                    self.spec.name, label, path, e
                );
                return Stdio::inherit();
            }
        };

        match file.try_clone() {
            Ok(clone) => *handle = Some(clone),
            Err(e) => debug!("Cannot keep a handle on {:?}: {}", path, e),
        }
        Stdio::from(file)
    }
}

async fn spawn_with_retry(cmd: &mut Command) -> std::io::Result<Child> {
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempt < SPAWN_ATTEMPTS => {
                debug!("Staged binary still busy, retrying spawn");
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            result => return result,
        }
    }
}

/// Wait for the process to exit, clear the running flag and log the status.
async fn monitor_process(
    service_name: String,
    generation: u64,
    mut child: Child,
    state: Arc<InstanceState>,
    stop_requested: Arc<AtomicBool>,
    exit_tx: Option<mpsc::Sender<ExitReport>>,
) {
    let result = child.wait().await;
    state.running.store(false, Ordering::SeqCst);

    let outcome = match result {
        Ok(status) => match status.code() {
            Some(code) => {
                info!("Service {} exited with exit code {}", service_name, code);
                ExitOutcome::Code(code)
            }
            None => {
                info!(
                    "Service {} was terminated by signal {:?}",
                    service_name,
                    status.signal()
                );
                ExitOutcome::Signaled
            }
        },
        Err(e) => {
            error!("Error waiting for service {}: {}", service_name, e);
            ExitOutcome::Signaled
        }
    };

    if stop_requested.load(Ordering::SeqCst) {
        return;
    }

    if let Some(exit_tx) = exit_tx {
        let report = ExitReport {
            service_name: service_name.clone(),
            generation,
            outcome,
        };
        if exit_tx.send(report).await.is_err() {
            debug!("Exit report channel closed for service {}", service_name);
        }
    }
}
