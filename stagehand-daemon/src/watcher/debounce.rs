//! Per-key debouncing on top of tokio timers

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Coalesces bursts of notifications per key.
///
/// Every `notify(key)` (re)arms a quiet-period timer for that key, replacing
/// the pending one. The key is emitted once the timer expires without being
/// re-armed. Must be used from within a tokio runtime.
pub struct Debouncer<K> {
    quiet_period: Duration,
    pending: HashMap<K, JoinHandle<()>>,
    out_tx: mpsc::UnboundedSender<K>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Create a debouncer and the receiver its coalesced keys are published on
    pub fn new(quiet_period: Duration) -> (Self, mpsc::UnboundedReceiver<K>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            quiet_period,
            pending: HashMap::new(),
            out_tx,
        };
        (debouncer, out_rx)
    }

    pub fn notify(&mut self, key: K) {
        self.pending.retain(|_, timer| !timer.is_finished());

        if let Some(previous) = self.pending.remove(&key) {
            previous.abort();
        }

        let out_tx = self.out_tx.clone();
        let quiet_period = self.quiet_period;
        let emitted = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            let _ = out_tx.send(emitted);
        });
        self.pending.insert(key, timer);
    }

    /// Number of keys with an armed timer
    pub fn pending(&self) -> usize {
        self.pending.values().filter(|t| !t.is_finished()).count()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for (_, timer) in self.pending.drain() {
            timer.abort();
        }
    }
}
