//! Restart policy flags

use serde::{Deserialize, Serialize};

/// How a managed process ended, as seen by its monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with a status code
    Code(i32),
    /// Terminated by a signal (no exit code available)
    Signaled,
}

impl ExitOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ExitOutcome::Code(0))
    }
}

/// Per-service restart triggers.
///
/// `on_change` binds the service's binary path to the change watcher.
/// `on_error` restarts after an unexpected failing exit, `on_exit` after any unexpected exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestartConfig {
    #[serde(default)]
    pub on_change: bool,
    #[serde(default)]
    pub on_error: bool,
    #[serde(default)]
    pub on_exit: bool,
}

impl RestartConfig {
    pub fn on_change() -> Self {
        Self { on_change: true, ..Self::default() }
    }

    /// Whether an exit that was not requested by `stop` should bring the service back
    pub fn should_restart_after(&self, outcome: ExitOutcome) -> bool {
        self.on_exit || (self.on_error && outcome.is_failure())
    }
}
