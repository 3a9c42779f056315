pub mod anchor;
pub mod config;
pub mod errors;
pub mod logs;
pub mod process;
pub mod service;
pub mod supervisor;
pub mod watcher;

pub use anchor::{Role, RunningInstance, DAEMON_MARKER_ENV};
pub use config::Config;
pub use errors::{DaemonError, Result};
pub use service::{InstanceProbe, ServiceInstance};
pub use supervisor::Supervisor;
