use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Running as root is not allowed, use --allow-root to override")]
    RootNotAllowed,

    #[error("Daemon did not stop within {0:?}")]
    StopTimeout(std::time::Duration),

    #[error(transparent)]
    Daemon(#[from] stagehand_daemon::DaemonError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
