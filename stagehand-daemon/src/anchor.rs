//! Daemon anchoring: detach a background copy of the current executable,
//! recognize that copy when it starts, and find or stop it later through
//! the pid file.
//!
//! The single-instance guarantee is optimistic: `start` probes the pid file
//! and launches when nothing answers. Two launches racing past the probe can
//! both succeed; nothing locks the pid file.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{DaemonError, Result};
use crate::logs::open_log_file;
use crate::process::{probe_process, process_exists, send_signal};
use crate::supervisor::{termination_signal, Supervisor};

/// Environment variable marking the background instance; holds the absolute config path
pub const DAEMON_MARKER_ENV: &str = "STAGEHAND_DAEMON";

const PID_FILE_MODE: u32 = 0o644;
const DAEMON_UMASK: libc::mode_t = 0o027;

/// How long `launch` waits for the background instance to record its pid
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(5);
const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the current process is supposed to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A regular one-shot invocation
    Foreground,
    /// The detached daemon started by `launch`
    Background { config_path: PathBuf },
}

impl Role {
    /// Decide the role from the marker variable's value
    pub fn from_marker(marker: Option<OsString>) -> Role {
        match marker {
            Some(value) if !value.is_empty() => Role::Background {
                config_path: PathBuf::from(value),
            },
            _ => Role::Foreground,
        }
    }

    /// Role of the current process
    pub fn current() -> Role {
        Self::from_marker(std::env::var_os(DAEMON_MARKER_ENV))
    }
}

/// A daemon process found alive through the pid file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningInstance {
    pid: u32,
}

impl RunningInstance {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        process_exists(self.pid)
    }
}

/// Spawn the background instance and wait until it has written its pid file.
///
/// The child runs in its own session with stdout/stderr appended to the
/// daemon log. Returns the child's pid.
pub async fn launch(config: &Config, config_path: &Path) -> Result<u32> {
    let exe = std::env::current_exe().map_err(DaemonError::Launch)?;
    let config_path = std::fs::canonicalize(config_path).map_err(DaemonError::Launch)?;
    let work_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    let stdout = open_log_file(&config.storage.log).map_err(DaemonError::Launch)?;
    let stderr = stdout.try_clone().map_err(DaemonError::Launch)?;

    let mut cmd = Command::new(&exe);
    cmd.env(DAEMON_MARKER_ENV, &config_path)
        .current_dir(&work_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    // SAFETY: setsid and umask are async-signal-safe
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            libc::umask(DAEMON_UMASK);
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(DaemonError::Launch)?;
    let pid = child.id();
    debug!("Spawned background instance {:?} with pid {}", exe, pid);

    let attempts = LAUNCH_TIMEOUT.as_millis() / LAUNCH_POLL_INTERVAL.as_millis();
    for _ in 0..attempts {
        tokio::time::sleep(LAUNCH_POLL_INTERVAL).await;

        if let Some(status) = child.try_wait().map_err(DaemonError::Launch)? {
            return Err(DaemonError::LaunchExited(status.to_string()));
        }

        if matches!(read_pid_file(&config.storage.pid_file), Ok(recorded) if recorded == pid) {
            info!("Background daemon started with pid {}", pid);
            return Ok(pid);
        }
    }

    warn!("Background daemon {} did not record its pid, terminating it", pid);
    let _ = send_signal(pid, Signal::SIGTERM);
    Err(DaemonError::LaunchTimeout(LAUNCH_TIMEOUT))
}

/// Body of the background instance: record the pid, supervise until
/// SIGTERM/SIGINT, then release the pid file.
///
/// Failing to write the pid file aborts startup.
pub async fn serve(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let pid_file = config.storage.pid_file.clone();

    write_pid_file(&pid_file, std::process::id())?;
    info!(
        "Daemon {} serving {} services from {:?}",
        std::process::id(),
        config.services.len(),
        config_path
    );

    let shutdown = termination_signal()?;
    Supervisor::new(config).run(shutdown).await;

    release(&pid_file);
    Ok(())
}

/// Find the daemon recorded in the configured pid file and check it is alive
pub fn get_running_instance(config: &Config) -> Result<RunningInstance> {
    find_running_instance(&config.storage.pid_file)
}

pub fn find_running_instance(pid_file: &Path) -> Result<RunningInstance> {
    let pid = read_pid_file(pid_file)?;
    probe_process(pid).map_err(|source| DaemonError::NotRunning { pid, source })?;
    Ok(RunningInstance { pid })
}

/// Ask a running daemon to shut down gracefully
pub fn request_stop(instance: &RunningInstance) -> Result<()> {
    send_signal(instance.pid, Signal::SIGTERM)
}

pub fn read_pid_file(path: &Path) -> Result<u32> {
    let content = std::fs::read_to_string(path).map_err(|source| DaemonError::PidFileRead {
        path: path.to_path_buf(),
        source,
    })?;

    match content.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(DaemonError::PidFileParse {
            path: path.to_path_buf(),
            content,
        }),
    }
}

pub fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    let write_error = |source| DaemonError::PidFileWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PID_FILE_MODE)
        .open(path)
        .map_err(write_error)?;
    file.write_all(pid.to_string().as_bytes())
        .map_err(write_error)?;
    Ok(())
}

/// Remove the pid file if it still names this process. Best-effort.
pub fn release(pid_file: &Path) {
    match read_pid_file(pid_file) {
        Ok(pid) if pid == std::process::id() => {
            if let Err(e) = std::fs::remove_file(pid_file) {
                warn!("Unable to release pid file {:?}: {}", pid_file, e);
            }
        }
        Ok(pid) => debug!("Pid file {:?} now names {}, leaving it", pid_file, pid),
        Err(e) => debug!("Nothing to release: {}", e),
    }
}
