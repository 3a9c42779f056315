//! Log file naming and opening
//!
//! Log paths may carry `{...}` tokens in their file name. Each token body is a
//! chrono strftime pattern evaluated against the local time when the file is
//! opened, e.g. `api-{%Y-%m-%d}.log` becomes `api-2026-10-16.log`.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use regex::Regex;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::warn;

static DATE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([^}]*)\}").unwrap()
});

/// Expand date tokens in the file name using the current local time
pub fn expand_date_tokens(path: &Path) -> PathBuf {
    expand_date_tokens_at(path, &Local::now())
}

/// Expand date tokens in the file name of `path` using the given timestamp.
///
/// Only the last path component is rewritten; directories are left untouched.
/// A token whose pattern chrono cannot format is replaced by its raw body.
pub fn expand_date_tokens_at(path: &Path, now: &DateTime<Local>) -> PathBuf {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return path.to_path_buf();
    };

    if !DATE_TOKEN.is_match(file_name) {
        return path.to_path_buf();
    }

    let expanded = DATE_TOKEN.replace_all(file_name, |caps: &regex::Captures<'_>| {
        let pattern = &caps[1];
        match format_pattern(pattern, now) {
            Some(formatted) => formatted,
            None => {
                warn!("Invalid date pattern {:?} in log path {:?}", pattern, path);
                pattern.to_string()
            }
        }
    });

    path.with_file_name(expanded.as_ref())
}

fn format_pattern(pattern: &str, now: &DateTime<Local>) -> Option<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return None;
    }

    let mut out = String::new();
    write!(out, "{}", now.format_with_items(items.into_iter())).ok()?;
    Some(out)
}

/// Open (creating if needed) a log file for appending
pub fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
