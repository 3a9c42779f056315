pub mod config_builder;
pub mod marker_files;
pub mod wait_utils;

use tracing_subscriber::EnvFilter;

/// Route daemon logs through the test harness; `RUST_LOG` picks the level
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
