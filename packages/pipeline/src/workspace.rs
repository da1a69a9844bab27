//! Per-deployment scratch directory.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Exclusive scratch directory for one deployment.
///
/// Call [`Workspace::release`] to remove it. If the guard is dropped without
/// being released (an early return, a panic, a cancelled task) the directory
/// is removed synchronously in `Drop`.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    armed: bool,
}

impl Workspace {
    /// Create the directory, removing whatever a previous attempt left there.
    pub async fn acquire(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();

        if tokio::fs::try_exists(&path).await? {
            warn!(path = %path.display(), "Removing stale workspace");
            tokio::fs::remove_dir_all(&path).await?;
        }
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Workspace acquired");

        Ok(Self { path, armed: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory tree. A directory that is already gone counts as
    /// removed.
    pub async fn release(mut self) -> io::Result<()> {
        self.armed = false;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Workspace released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove workspace on drop");
        }
    }
}
