use crate::errors::{CliError, Result};
use stagehand_daemon::config::{Config, CONFIG_FILE_NAMES};
use std::path::PathBuf;

/// Resolve config path from the CLI option or search from the current directory upward
pub fn resolve_config_path(file: Option<&str>) -> Result<PathBuf> {
    match file {
        Some(path) => Ok(PathBuf::from(path)),
        None => {
            let cwd = std::env::current_dir()?;
            Config::find_config_file(&cwd)
                .ok_or_else(|| CliError::ConfigNotFound(PathBuf::from(CONFIG_FILE_NAMES[0])))
        }
    }
}
