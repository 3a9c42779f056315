//! Test utilities for the stagehand workspace
//!
//! This crate provides builders for configs and services backed by small
//! shell scripts, marker files that record launches, and wait helpers for
//! instance state transitions.

pub mod helpers;

pub use helpers::init_test_logging;
pub use helpers::config_builder::{write_script, TestConfigBuilder, TestServiceBuilder};
pub use helpers::marker_files::MarkerFileHelper;
pub use helpers::wait_utils::{wait_for_launches, wait_for_running, wait_for_stopped, WaitError};
