use std::path::PathBuf;
use thiserror::Error;

/// Format a YAML error for user-friendly display, including the field path
fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = if let Some(loc) = inner.location() {
        format!("Line {}, Column {}: {}", loc.line(), loc.column(), msg)
    } else {
        msg
    };

    if path.is_empty() || path == "." {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file '{path}':\n  {}", format_yaml_error(.source))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to stage binary for service {service}: {message}")]
    Staging {
        service: String,
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Service {0} has an empty command")]
    EmptyCommand(String),

    #[error("Failed to spawn process for service {service}: {source}")]
    ProcessSpawn {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send {signal} to process {pid}: {source}")]
    Signal {
        pid: u32,
        signal: nix::sys::signal::Signal,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Unable to read pid file {path}: {source}")]
    PidFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse pid file {path}: {content:?} is not a process id")]
    PidFileParse { path: PathBuf, content: String },

    #[error("Unable to write pid file {path}: {source}")]
    PidFileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Daemon is not running (pid {pid}): {source}")]
    NotRunning {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Failed to launch background daemon: {0}")]
    Launch(#[source] std::io::Error),

    #[error("Background daemon exited during startup ({0})")]
    LaunchExited(String),

    #[error("Background daemon did not report ready within {0:?}")]
    LaunchTimeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
