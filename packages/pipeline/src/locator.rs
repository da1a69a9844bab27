//! Output locator.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::error::PipelineError;

/// Directory names recognised as build output.
pub const OUTPUT_DIR_NAMES: [&str; 4] = ["dist", "build", "public", "out"];

/// Find the build output directories that are immediate children of
/// `service_dir`, in directory listing order.
///
/// Only direct children are considered; nested matches such as `src/dist`
/// are ignored. Symlinks are skipped, so an output directory can never lead
/// outside the checked-out tree.
pub async fn locate_outputs(service_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut entries = tokio::fs::read_dir(service_dir).await.map_err(|e| {
        error!(dir = %service_dir.display(), error = %e, "Error reading service directory");
        PipelineError::Io(e)
    })?;

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !OUTPUT_DIR_NAMES.contains(&name) {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_symlink() {
            warn!(path = %path.display(), "Skipping symlinked output folder");
            continue;
        }
        if file_type.is_dir() {
            found.push(path);
        }
    }

    if found.is_empty() {
        error!(dir = %service_dir.display(), "No output folders found");
        return Err(PipelineError::NoOutputFound(service_dir.to_path_buf()));
    }

    info!(folders = ?found, "Found output folders");
    Ok(found)
}
