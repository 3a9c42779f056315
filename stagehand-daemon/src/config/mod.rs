//! Configuration module for the stagehand daemon
//!
//! This module provides:
//! - `Config` - Root configuration structure
//! - `ServiceSpec` - Per-service configuration
//! - Loading, path normalization and validation of `stagehand.yaml`

mod duration;
mod restart;

pub use duration::{format_duration, parse_duration};
pub use restart::{ExitOutcome, RestartConfig};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::errors::{DaemonError, Result};
use crate::logs::expand_date_tokens;

/// File names searched when no config path is given
pub const CONFIG_FILE_NAMES: [&str; 2] = ["stagehand.yaml", "stagehand.yml"];

const DEFAULT_PID_FILE: &str = "~/.stagehand/stagehand.pid";
const DEFAULT_BINARIES_DIR: &str = "~/.stagehand/bin";
const DEFAULT_LOG_FILE: &str = "~/.stagehand/stagehand.log";

fn default_grace_period() -> Duration {
    Duration::from_secs(3)
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Time a service gets between SIGTERM and SIGKILL when stopped
    #[serde(
        default = "default_grace_period",
        deserialize_with = "duration::deserialize_duration",
        serialize_with = "duration::serialize_duration"
    )]
    pub grace_period: Duration,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            storage: StorageConfig::default(),
            services: Vec::new(),
        }
    }
}

/// Where the daemon keeps its own state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub pid_file: PathBuf,
    /// Directory receiving the staged copies of service binaries
    pub binaries: PathBuf,
    /// Daemon log file, may contain `{...}` date tokens
    pub log: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            binaries: PathBuf::from(DEFAULT_BINARIES_DIR),
            log: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

/// One managed service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    pub name: String,
    /// Source binary; it is copied into storage on every start
    pub binary_path: PathBuf,
    /// Launch command template, `{binary}` is replaced by the staged artifact path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub logs: ServiceLogs,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            binary_path: binary_path.into(),
            command: None,
            working_dir: None,
            environment: HashMap::new(),
            restart: RestartConfig::default(),
            logs: ServiceLogs::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

/// Optional log file templates for a service's output streams
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceLogs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<PathBuf>,
}

/// Reverse-proxy metadata. Carried for external tooling, never acted upon by the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Config {
    /// Find the configuration file in the given directory or its parents
    pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir.to_path_buf();
        loop {
            for name in CONFIG_FILE_NAMES {
                let candidate = current.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Read, parse and validate a configuration file.
    ///
    /// Relative paths inside the file are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Config> {
        let path = std::fs::canonicalize(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DaemonError::ConfigNotFound(path.to_path_buf())
            } else {
                DaemonError::Io(e)
            }
        })?;

        let contents = std::fs::read_to_string(&path)?;
        let mut config = Self::parse(&contents, &path)?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("/"));
        config.validate(base_dir, dirs::home_dir().as_deref())?;

        debug!(
            "Loaded config {:?} with {} services",
            path,
            config.services.len()
        );
        Ok(config)
    }

    /// Parse YAML contents without validating them
    pub fn parse(contents: &str, path: &Path) -> Result<Config> {
        let deserializer = serde_yaml::Deserializer::from_str(contents);
        serde_path_to_error::deserialize(deserializer).map_err(|source| {
            DaemonError::ConfigParse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Normalize every path and check the invariants the supervisor relies on.
    pub fn validate(&mut self, base_dir: &Path, home: Option<&Path>) -> Result<()> {
        if self.grace_period.is_zero() {
            return Err(DaemonError::Config(
                "grace_period must be greater than 0".to_string(),
            ));
        }

        let storage = &mut self.storage;
        storage.pid_file = resolve_path(&storage.pid_file, base_dir, home)?;
        require_parent_dir(&storage.pid_file, "pid_file")?;

        storage.log = resolve_path(&storage.log, base_dir, home)?;
        require_parent_dir(&storage.log, "log")?;
        storage.log = expand_date_tokens(&storage.log);

        storage.binaries = resolve_path(&storage.binaries, base_dir, home)?;
        std::fs::create_dir_all(&storage.binaries).map_err(|e| {
            DaemonError::Config(format!(
                "binaries directory {} cannot be created: {}",
                storage.binaries.display(),
                e
            ))
        })?;
        if !storage.binaries.is_dir() {
            return Err(DaemonError::Config(format!(
                "binaries is not a directory: {}",
                storage.binaries.display()
            )));
        }

        let mut names = HashSet::new();
        for (index, service) in self.services.iter_mut().enumerate() {
            if service.name.trim().is_empty() {
                return Err(DaemonError::Config(format!(
                    "Service name is empty at index {}",
                    index
                )));
            }
            if !names.insert(service.name.clone()) {
                return Err(DaemonError::Config(format!(
                    "Service name is not unique: {}",
                    service.name
                )));
            }

            validate_service(service, base_dir, home)?;
        }

        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }
}

fn validate_service(service: &mut ServiceSpec, base_dir: &Path, home: Option<&Path>) -> Result<()> {
    let name = service.name.clone();

    if service.binary_path.as_os_str().is_empty() {
        return Err(DaemonError::Config(format!(
            "Service binary is empty for {}",
            name
        )));
    }
    service.binary_path = resolve_path(&service.binary_path, base_dir, home)?;
    if !service.binary_path.is_file() {
        return Err(DaemonError::Config(format!(
            "Service binary does not exist for {}: {}",
            name,
            service.binary_path.display()
        )));
    }

    if let Some(command) = &service.command
        && command.split_whitespace().next().is_none()
    {
        return Err(DaemonError::EmptyCommand(name));
    }

    for (label, slot) in [
        ("stdout", &mut service.logs.stdout),
        ("stderr", &mut service.logs.stderr),
    ] {
        if let Some(log_path) = slot {
            *log_path = resolve_path(log_path, base_dir, home)?;
            require_parent_dir(log_path, &format!("Service {} {} log", name, label))?;
        }
    }

    if let Some(dir) = &service.working_dir {
        let dir = resolve_path(dir, base_dir, home)?;
        if !dir.is_dir() {
            return Err(DaemonError::Config(format!(
                "Service execution directory does not exist or is not a directory: {}",
                dir.display()
            )));
        }
        service.working_dir = Some(dir);
    }

    if service.proxy.enabled
        && service
            .proxy
            .host
            .as_deref()
            .is_none_or(|h| h.trim().is_empty())
    {
        return Err(DaemonError::Config(format!(
            "Proxy host is empty for {}",
            name
        )));
    }

    Ok(())
}

fn require_parent_dir(path: &Path, label: &str) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("/"));
    if parent.is_dir() {
        Ok(())
    } else {
        Err(DaemonError::Config(format!(
            "{} directory does not exist: {}",
            label,
            path.display()
        )))
    }
}

/// Expand a leading `~`, anchor relative paths at `base_dir` and clean `.`/`..` lexically.
pub fn resolve_path(path: &Path, base_dir: &Path, home: Option<&Path>) -> Result<PathBuf> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => {
            let home = home.ok_or_else(|| {
                DaemonError::Config(format!(
                    "Cannot expand {}: home directory is unknown",
                    path.display()
                ))
            })?;
            home.join(rest)
        }
        Err(_) => path.to_path_buf(),
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    };

    Ok(clean_path(&absolute))
}

fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
