//! Change watcher for service binaries
//!
//! Wraps a `notify` backend and coalesces bursts of writes to a watched path
//! into one event, published after the path has been quiet for a full second.
//! Build tools tend to touch an output binary several times in a row; only the
//! last write of a burst should trigger a restart.

mod debounce;

pub use debounce::Debouncer;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Quiet period after the last write before a change is published
pub const DEBOUNCE_PERIOD: Duration = Duration::from_secs(1);

/// Whether an event kind means the file content (or the file itself) changed
fn is_write(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) | EventKind::Create(_) => true,
        _ => false,
    }
}

/// Debounced file watcher.
///
/// Backend failures never propagate: if the backend cannot be created the
/// watcher stays inert and `next_change` never resolves.
pub struct ChangeWatcher {
    backend: Option<RecommendedWatcher>,
    interest: Arc<Mutex<HashSet<PathBuf>>>,
    watched_dirs: HashSet<PathBuf>,
    events: mpsc::UnboundedReceiver<PathBuf>,
    forwarder: JoinHandle<()>,
}

impl ChangeWatcher {
    /// Create a watcher with the default one-second quiet period.
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_quiet_period(DEBOUNCE_PERIOD)
    }

    pub fn with_quiet_period(quiet_period: Duration) -> Self {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let (mut debouncer, events) = Debouncer::new(quiet_period);
        let interest: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));

        let filter = interest.clone();
        let backend = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if !is_write(&event.kind) {
                        return;
                    }
                    let interest = filter.lock();
                    for path in event.paths {
                        if interest.contains(&path) {
                            let _ = raw_tx.send(path);
                        }
                    }
                }
                Err(e) => warn!("Error while watching for changes: {}", e),
            }
        });

        let backend = match backend {
            Ok(backend) => Some(backend),
            Err(e) => {
                error!("Error creating file watcher: {}", e);
                error!("Binary changes will not trigger restarts");
                None
            }
        };

        // Raw notifications arrive on the backend's thread; the debouncer lives here.
        let forwarder = tokio::spawn(async move {
            while let Some(path) = raw_rx.recv().await {
                debug!("Raw change notification for {:?}", path);
                debouncer.notify(path);
            }
        });

        Self {
            backend,
            interest,
            watched_dirs: HashSet::new(),
            events,
            forwarder,
        }
    }

    /// Whether the notification backend is available
    pub fn is_active(&self) -> bool {
        self.backend.is_some()
    }

    /// Register interest in `path`.
    ///
    /// The parent directory is watched rather than the file, so replacing the
    /// file (write to temp + rename) is seen as a change too. Errors are logged.
    pub fn add(&mut self, path: &Path) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) else {
            warn!("Cannot watch {:?}: no parent directory", path);
            return;
        };

        if !self.watched_dirs.contains(dir) {
            if let Err(e) = backend.watch(dir, RecursiveMode::NonRecursive) {
                warn!("Error adding {:?} to watcher: {}", dir, e);
                return;
            }
            self.watched_dirs.insert(dir.to_path_buf());
        }

        self.interest.lock().insert(path.to_path_buf());
        info!("Watching {:?} for changes", path);
    }

    /// Wait for the next coalesced change
    pub async fn next_change(&mut self) -> PathBuf {
        match self.events.recv().await {
            Some(path) => path,
            None => std::future::pending().await,
        }
    }
}

impl Default for ChangeWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
