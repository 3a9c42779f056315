//! Signal delivery and liveness probing for OS processes

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::trace;

use crate::errors::{DaemonError, Result};

/// Send `signal` to `pid`.
///
/// Pids that `kill` would read as a process group (0, or anything past
/// `i32::MAX`) are refused with ESRCH.
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let signal_error = |source| DaemonError::Signal {
        pid,
        signal,
        source,
    };

    let raw = checked_pid(pid).ok_or_else(|| signal_error(Errno::ESRCH))?;
    trace!("Sending {} to process {}", signal, pid);
    kill(raw, signal).map_err(signal_error)
}

/// Probe a process with signal 0 (no effect on the target).
///
/// Returns the errno when the process is gone or not signalable by us.
pub fn probe_process(pid: u32) -> std::result::Result<(), Errno> {
    let raw = checked_pid(pid).ok_or(Errno::ESRCH)?;
    kill(raw, None)
}

pub fn process_exists(pid: u32) -> bool {
    probe_process(pid).is_ok()
}

/// A pid that addresses exactly one process
fn checked_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_addressing_pids_are_never_signaled() {
        for pid in [0, u32::MAX, i32::MAX as u32 + 1] {
            let err = send_signal(pid, Signal::SIGTERM).unwrap_err();
            assert!(
                matches!(err, DaemonError::Signal { source: Errno::ESRCH, .. }),
                "pid {} was not refused: {}",
                pid,
                err
            );
            assert!(!process_exists(pid));
        }
    }

    #[test]
    fn own_process_is_probed_alive() {
        assert!(process_exists(std::process::id()));
        send_signal(std::process::id(), Signal::SIGCONT).unwrap();
    }
}
