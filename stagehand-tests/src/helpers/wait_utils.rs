//! Async utilities to wait for instance state transitions

use stagehand_daemon::InstanceProbe;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for wait operations
#[derive(Debug)]
pub enum WaitError {
    Timeout,
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout => write!(f, "Wait operation timed out"),
        }
    }
}

impl std::error::Error for WaitError {}

async fn wait_until(
    probe: &InstanceProbe,
    timeout: Duration,
    condition: impl Fn(&InstanceProbe) -> bool,
) -> Result<(), WaitError> {
    let start = Instant::now();

    while start.elapsed() < timeout {
        if condition(probe) {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }

    if condition(probe) {
        Ok(())
    } else {
        Err(WaitError::Timeout)
    }
}

/// Wait for the instance's running flag to be set
pub async fn wait_for_running(probe: &InstanceProbe, timeout: Duration) -> Result<(), WaitError> {
    wait_until(probe, timeout, InstanceProbe::is_running).await
}

/// Wait for the instance's running flag to be cleared
pub async fn wait_for_stopped(probe: &InstanceProbe, timeout: Duration) -> Result<(), WaitError> {
    wait_until(probe, timeout, |p| !p.is_running()).await
}

/// Wait until the instance has been launched at least `launches` times
pub async fn wait_for_launches(
    probe: &InstanceProbe,
    launches: u64,
    timeout: Duration,
) -> Result<(), WaitError> {
    wait_until(probe, timeout, |p| p.launches() >= launches).await
}
