//! Handing a finished export to durable storage, then cleaning up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{HandOffError, Result, VideoFxError};

/// External collaborator that persists a finished artifact
pub trait HandOff: Send + Sync {
    /// Persist `artifact` and return where it ended up
    ///
    /// The artifact is deleted afterwards whatever the outcome, so
    /// implementations must copy it rather than keep a reference. Returning
    /// the artifact's own path keeps it in place.
    fn persist(&self, artifact: &Path) -> Result<PathBuf>;
}

/// Copies artifacts into a directory (a stand-in for a media gallery)
#[derive(Debug, Clone)]
pub struct DirectoryHandOff {
    dir: PathBuf,
}

impl DirectoryHandOff {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl HandOff for DirectoryHandOff {
    fn persist(&self, artifact: &Path) -> Result<PathBuf> {
        let persist_failed = |reason: String| HandOffError::PersistFailed {
            path: artifact.display().to_string(),
            reason,
        };

        let name = artifact
            .file_name()
            .ok_or_else(|| persist_failed("artifact has no file name".to_string()))?;
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| persist_failed(format!("cannot create {}: {}", self.dir.display(), e)))?;

        let destination = self.dir.join(name);
        if same_file(artifact, &destination) {
            info!("{} is already in {}", artifact.display(), self.dir.display());
            return Ok(destination);
        }
        std::fs::copy(artifact, &destination).map_err(|e| persist_failed(e.to_string()))?;

        info!("Saved {} to {}", artifact.display(), destination.display());
        Ok(destination)
    }
}

/// True when both paths resolve to the same existing file
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Delete a temporary artifact. A file that is already gone is not an error.
pub fn remove_artifact(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HandOffError::CleanupFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()),
    }
}

/// Run the hand-off off the async executor, then delete the artifact
///
/// Cleanup happens on success and on failure, unless the hand-off persisted
/// the artifact in place. A cleanup failure is logged; the returned result
/// is the hand-off's own.
pub async fn hand_off_and_cleanup(handoff: Arc<dyn HandOff>, artifact: PathBuf) -> Result<PathBuf> {
    let target = artifact.clone();
    let persisted = tokio::task::spawn_blocking(move || handoff.persist(&target))
        .await
        .map_err(|e| VideoFxError::generic(format!("Hand-off task failed: {}", e)))
        .and_then(|result| result);

    if let Err(e) = &persisted {
        warn!("Hand-off of {} failed: {}", artifact.display(), e);
    }

    match &persisted {
        Ok(saved) if same_file(saved, &artifact) => {
            debug!("Keeping {}, it was persisted in place", artifact.display());
        }
        _ => {
            if let Err(e) = remove_artifact(&artifact) {
                warn!("{}", e);
            }
        }
    }

    persisted
}
