//! Launch command resolution

use std::path::Path;

/// Placeholder replaced by the staged artifact path
pub const BINARY_PLACEHOLDER: &str = "{binary}";

/// Program and arguments for one launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Resolve the command that launches `artifact`.
///
/// Without a template the artifact runs directly with no arguments. With a
/// template, `{binary}` is substituted and the result is split on whitespace.
/// There is no quoting: an argument can never contain whitespace.
/// Returns `None` when the template holds no program at all.
pub fn resolve_launch_command(template: Option<&str>, artifact: &Path) -> Option<LaunchCommand> {
    let artifact = artifact.to_string_lossy();

    let Some(template) = template else {
        return Some(LaunchCommand {
            program: artifact.into_owned(),
            args: Vec::new(),
        });
    };

    let substituted = template.replace(BINARY_PLACEHOLDER, &artifact);
    let mut parts = substituted.split_whitespace().map(str::to_string);
    let program = parts.next()?;

    Some(LaunchCommand {
        program,
        args: parts.collect(),
    })
}
