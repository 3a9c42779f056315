//! Programmatic config creation with builder pattern

use stagehand_daemon::config::{Config, RestartConfig, ServiceSpec, StorageConfig};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Write an executable `#!/bin/sh` script and return its path
pub fn write_script(dir: &Path, name: &str, body: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Builder for creating test configurations rooted in a temp directory
pub struct TestConfigBuilder {
    root: PathBuf,
    grace_period: Duration,
    services: Vec<ServiceSpec>,
}

impl TestConfigBuilder {
    /// Storage (pid file, binaries, daemon log) lives directly under `root`
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            grace_period: Duration::from_secs(3),
            services: Vec::new(),
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn add_service(mut self, service: ServiceSpec) -> Self {
        self.services.push(service);
        self
    }

    fn storage(&self) -> StorageConfig {
        StorageConfig {
            pid_file: self.root.join("stagehand.pid"),
            binaries: self.root.join("bin"),
            log: self.root.join("stagehand.log"),
        }
    }

    /// Build the config and create the binaries directory
    pub fn build(self) -> Config {
        let storage = self.storage();
        std::fs::create_dir_all(&storage.binaries)
            .unwrap_or_else(|e| panic!("cannot create {:?}: {}", storage.binaries, e));

        Config {
            grace_period: self.grace_period,
            storage,
            services: self.services,
        }
    }

    /// Write the config to a YAML file and return the path
    pub fn write_to_file(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let config = Config {
            grace_period: self.grace_period,
            storage: self.storage(),
            services: self.services.clone(),
        };

        let path = dir.join("stagehand.yaml");
        let contents = serde_yaml::to_string(&config).map_err(std::io::Error::other)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Builder for creating test service specs
pub struct TestServiceBuilder {
    name: String,
    binary_path: PathBuf,
    command: Option<String>,
    working_dir: Option<PathBuf>,
    environment: HashMap<String, String>,
    restart: RestartConfig,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
}

impl TestServiceBuilder {
    pub fn new(name: &str, binary_path: &Path) -> Self {
        Self {
            name: name.to_string(),
            binary_path: binary_path.to_path_buf(),
            command: None,
            working_dir: None,
            environment: HashMap::new(),
            restart: RestartConfig::default(),
            stdout: None,
            stderr: None,
        }
    }

    /// Service backed by a fresh script named after the service
    pub fn script(dir: &Path, name: &str, body: &str) -> Self {
        let binary = write_script(dir, name, body)
            .unwrap_or_else(|e| panic!("cannot write script {}: {}", name, e));
        Self::new(name, &binary)
    }

    /// Service that stays up until signaled
    pub fn long_running(dir: &Path, name: &str) -> Self {
        Self::script(dir, name, "exec sleep 3600")
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    pub fn with_working_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    pub fn restart_on_change(mut self) -> Self {
        self.restart.on_change = true;
        self
    }

    pub fn restart_on_error(mut self) -> Self {
        self.restart.on_error = true;
        self
    }

    pub fn restart_on_exit(mut self) -> Self {
        self.restart.on_exit = true;
        self
    }

    pub fn with_stdout_log(mut self, path: &Path) -> Self {
        self.stdout = Some(path.to_path_buf());
        self
    }

    pub fn with_stderr_log(mut self, path: &Path) -> Self {
        self.stderr = Some(path.to_path_buf());
        self
    }

    pub fn build(self) -> ServiceSpec {
        let mut spec = ServiceSpec::new(self.name, self.binary_path);
        spec.command = self.command;
        spec.working_dir = self.working_dir;
        spec.environment = self.environment;
        spec.restart = self.restart;
        spec.logs.stdout = self.stdout;
        spec.logs.stderr = self.stderr;
        spec
    }
}
