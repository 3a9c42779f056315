//! Binary staging: copy a service's source binary into the shared storage
//! directory under a collision-free name, then mark it executable.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{DaemonError, Result};

const ARTIFACT_MODE: u32 = 0o755;

/// Name of a staged artifact: `<service>-<8 hex digits>`
pub fn artifact_name(service: &str, suffix: u32) -> String {
    format!("{}-{:08x}", service, suffix)
}

/// Stage `source` for `service` using random suffixes
pub fn stage_binary(service: &str, source: &Path, storage_dir: &Path) -> Result<PathBuf> {
    stage_binary_with(service, source, storage_dir, rand::random::<u32>)
}

/// `stage_binary` on the blocking pool, keeping the copy and fsync off the runtime threads
pub async fn stage_binary_async(service: &str, source: &Path, storage_dir: &Path) -> Result<PathBuf> {
    let name = service.to_string();
    let source = source.to_path_buf();
    let storage_dir = storage_dir.to_path_buf();

    tokio::task::spawn_blocking(move || stage_binary(&name, &source, &storage_dir))
        .await
        .map_err(|e| DaemonError::Staging {
            service: service.to_string(),
            message: "staging task did not complete".to_string(),
            source: io::Error::other(e),
        })?
}

/// Stage `source` drawing name suffixes from `next_suffix`.
///
/// The artifact is created with create-new semantics, so an existing file is
/// never overwritten: a name collision draws a new suffix and tries again.
pub fn stage_binary_with<F>(
    service: &str,
    source: &Path,
    storage_dir: &Path,
    mut next_suffix: F,
) -> Result<PathBuf>
where
    F: FnMut() -> u32,
{
    let staging_error = |message: String, source: io::Error| DaemonError::Staging {
        service: service.to_string(),
        message,
        source,
    };

    let mut source_file = File::open(source)
        .map_err(|e| staging_error(format!("cannot open source binary {}", source.display()), e))?;

    let (artifact, mut dest) = loop {
        let candidate = storage_dir.join(artifact_name(service, next_suffix()));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => break (candidate, file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Artifact name {:?} already taken, drawing a new one", candidate);
            }
            Err(e) => {
                return Err(staging_error(
                    format!("cannot create artifact {}", candidate.display()),
                    e,
                ));
            }
        }
    };

    let copied = io::copy(&mut source_file, &mut dest)
        .and_then(|_| dest.sync_all())
        .and_then(|_| fs::set_permissions(&artifact, Permissions::from_mode(ARTIFACT_MODE)));
    drop(dest);

    if let Err(e) = copied {
        discard_artifact(&artifact);
        return Err(staging_error(
            format!("cannot copy binary to {}", artifact.display()),
            e,
        ));
    }

    debug!("Staged {:?} for service {} at {:?}", source, service, artifact);
    Ok(artifact)
}

/// Best-effort removal of a staged artifact
pub fn discard_artifact(artifact: &Path) {
    if let Err(e) = fs::remove_file(artifact)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!("Failed to remove staged binary {:?}: {}", artifact, e);
    }
}
