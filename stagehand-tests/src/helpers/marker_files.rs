//! Launch verification using marker files

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Helper for verifying service launches via marker files
#[derive(Clone)]
pub struct MarkerFileHelper {
    base_dir: PathBuf,
}

impl MarkerFileHelper {
    /// Create a new marker file helper with the given base directory
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Get the path to a marker file
    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.marker", name))
    }

    /// Shell line appending the script's pid to a marker file
    pub fn record_pid_line(&self, name: &str) -> String {
        format!("echo $$ >> {}", self.marker_path(name).display())
    }

    /// Check if a marker file exists
    pub fn marker_exists(&self, name: &str) -> bool {
        self.marker_path(name).exists()
    }

    /// Wait for a marker file to appear
    pub async fn wait_for_marker(&self, name: &str, timeout: Duration) -> bool {
        let marker_path = self.marker_path(name);
        let start = Instant::now();

        while start.elapsed() < timeout {
            if marker_path.exists() {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }

        false
    }

    /// Count the number of lines in a marker file (one per launch when using `record_pid_line`)
    pub fn count_marker_lines(&self, name: &str) -> usize {
        let marker_path = self.marker_path(name);
        if let Ok(content) = std::fs::read_to_string(&marker_path) {
            content.lines().count()
        } else {
            0
        }
    }

    /// Wait until the marker file has at least the specified number of lines
    pub async fn wait_for_marker_lines(
        &self,
        name: &str,
        expected_lines: usize,
        timeout: Duration,
    ) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if self.count_marker_lines(name) >= expected_lines {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }

        false
    }

    /// Pids recorded by `record_pid_line`, oldest first
    pub fn recorded_pids(&self, name: &str) -> Vec<u32> {
        self.read_marker(name)
            .map(|content| content.lines().filter_map(|l| l.trim().parse().ok()).collect())
            .unwrap_or_default()
    }

    /// Read the content of a marker file
    pub fn read_marker(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.marker_path(name)).ok()
    }
}
