//! Supervisor event loop
//!
//! Owns one `ServiceInstance` per configured service and the bindings from
//! watched binary paths to service names. A single loop serializes everything
//! that can happen to the services: binary changes, unexpected exits and the
//! termination signal. A restart that has to wait out a grace period holds
//! the loop for that long, so restarts never overlap.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::Result;
use crate::service::{ExitReport, InstanceProbe, ServiceInstance};
use crate::watcher::ChangeWatcher;

/// Pause before restarting a service that exited on its own
pub const RESTART_BACKOFF: Duration = Duration::from_millis(500);

const EXIT_CHANNEL_CAPACITY: usize = 100;

enum LoopEvent {
    Shutdown,
    BinaryChanged(PathBuf),
    Exited(ExitReport),
}

pub struct Supervisor {
    instances: Vec<ServiceInstance>,
    watch_bindings: HashMap<PathBuf, String>,
    exit_rx: mpsc::Receiver<ExitReport>,
}

impl Supervisor {
    /// Build one stopped instance per service, in declaration order
    pub fn new(config: Config) -> Self {
        let (exit_tx, exit_rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
        let Config {
            grace_period,
            storage,
            services,
        } = config;

        let instances = services
            .into_iter()
            .map(|spec| {
                ServiceInstance::new(spec, &storage.binaries, grace_period)
                    .with_exit_reports(exit_tx.clone())
            })
            .collect();

        Self {
            instances,
            watch_bindings: HashMap::new(),
            exit_rx,
        }
    }

    pub fn instances(&self) -> &[ServiceInstance] {
        &self.instances
    }

    pub fn instance(&self, name: &str) -> Option<&ServiceInstance> {
        self.instances.iter().find(|i| i.name() == name)
    }

    pub fn probe(&self, name: &str) -> Option<InstanceProbe> {
        self.instance(name).map(ServiceInstance::probe)
    }

    /// Service bound to a watched path, if any
    pub fn bound_service(&self, path: &Path) -> Option<&str> {
        self.watch_bindings.get(path).map(String::as_str)
    }

    fn instance_mut(&mut self, name: &str) -> Option<&mut ServiceInstance> {
        self.instances.iter_mut().find(|i| i.name() == name)
    }

    /// Start every service, then process events until `shutdown` resolves.
    ///
    /// Returns once every instance has been stopped.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("Starting stagehand supervisor");

        let mut watcher = ChangeWatcher::new();
        self.watch_bindings.clear();

        for instance in &mut self.instances {
            if let Err(e) = instance.start().await {
                error!("Cannot start service {}: {}", instance.name(), e);
            }

            let spec = instance.spec();
            if spec.restart.on_change {
                self.watch_bindings
                    .insert(spec.binary_path.clone(), spec.name.clone());
                watcher.add(&spec.binary_path);
            }
        }

        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            let event = tokio::select! {
                _ = &mut shutdown => LoopEvent::Shutdown,
                path = watcher.next_change() => LoopEvent::BinaryChanged(path),
                Some(report) = self.exit_rx.recv() => LoopEvent::Exited(report),
            };

            match event {
                LoopEvent::Shutdown => {
                    info!("Received stop signal, cleaning up and exiting");
                    break;
                }
                LoopEvent::BinaryChanged(path) => self.handle_change(&path).await,
                LoopEvent::Exited(report) => self.handle_exit(report).await,
            }
        }

        self.stop_all().await;
        info!("Supervisor stopped");
    }

    async fn handle_change(&mut self, path: &Path) {
        let Some(name) = self.watch_bindings.get(path).cloned() else {
            error!("Watched file {:?} is not linked to any service", path);
            return;
        };

        let Some(instance) = self.instance_mut(&name) else {
            error!("Service {} bound to {:?} does not exist", name, path);
            return;
        };

        info!("Restarting service {} (binary changed)", name);
        if let Err(e) = instance.restart().await {
            error!("Failed to restart service {}: {}", name, e);
        }
    }

    async fn handle_exit(&mut self, report: ExitReport) {
        let Some(instance) = self.instance_mut(&report.service_name) else {
            warn!("Exit report for unknown service {}", report.service_name);
            return;
        };

        if report.generation != instance.generation() || instance.is_running() {
            debug!(
                "Ignoring stale exit report for service {} (generation {})",
                report.service_name, report.generation
            );
            return;
        }

        if !instance.spec().restart.should_restart_after(report.outcome) {
            return;
        }

        info!(
            "Restarting service {} after unexpected exit ({:?})",
            report.service_name, report.outcome
        );
        tokio::time::sleep(RESTART_BACKOFF).await;
        if let Err(e) = instance.start().await {
            error!("Failed to restart service {}: {}", report.service_name, e);
        }
    }

    /// Stop every running instance, last started first
    async fn stop_all(&mut self) {
        for instance in self.instances.iter_mut().rev() {
            if instance.is_running() {
                instance.stop().await;
            }
        }
    }
}

/// Run a supervisor for `config` until `shutdown` resolves
pub async fn run<F>(config: Config, shutdown: F)
where
    F: Future<Output = ()>,
{
    Supervisor::new(config).run(shutdown).await;
}

/// Future resolving on the first SIGTERM or SIGINT delivered to this process
pub fn termination_signal() -> Result<impl Future<Output = ()> + Send + 'static> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = interrupt.recv() => info!("Received SIGINT"),
        }
    })
}
