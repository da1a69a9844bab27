//! Artifact publisher: upload every file under the output directories to
//! object storage.

use std::ffi::OsString;
use std::fs::FileType;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use deploy_core::{DeploymentId, UploadReport};
use storage::{Storage, StorageError};
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;

/// Key prefix under which all deployment artifacts are stored.
pub const OUTPUT_PREFIX: &str = "__outputs";

/// Future type for artifact sinks.
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>>;

/// Destination for published files.
pub trait ArtifactSink: Send + Sync + 'static {
    /// Store `bytes` under `key`, replacing any previous object.
    fn put<'a>(&'a self, key: &'a str, bytes: Bytes, content_type: &'a str) -> SinkFuture<'a>;
}

impl ArtifactSink for Storage {
    fn put<'a>(&'a self, key: &'a str, bytes: Bytes, content_type: &'a str) -> SinkFuture<'a> {
        Box::pin(self.put_object(key, bytes, Some(content_type)))
    }
}

/// Object key for a file at `relative` inside an output directory.
///
/// Returns `None` for paths that are not valid UTF-8.
pub fn object_key(deployment_id: &DeploymentId, relative: &Path) -> Option<String> {
    let mut key = format!("{}/{}", OUTPUT_PREFIX, deployment_id);
    for part in relative.components() {
        key.push('/');
        key.push_str(part.as_os_str().to_str()?);
    }
    Some(key)
}

/// MIME type for a file, by extension.
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `base * 2^attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Uploads output directories file by file.
#[derive(Clone)]
pub struct ArtifactPublisher {
    sink: Arc<dyn ArtifactSink>,
    retry: RetryPolicy,
}

impl ArtifactPublisher {
    pub fn new(sink: Arc<dyn ArtifactSink>, retry: RetryPolicy) -> Self {
        Self { sink, retry }
    }

    /// Upload every regular file under each directory in `output_dirs`.
    ///
    /// Keys are relative to the output directory itself, so `dist/index.html`
    /// becomes `__outputs/<deployment>/index.html`. When several output
    /// directories hold the same relative path, the later one wins. Files are
    /// uploaded one at a time. Per-file failures never abort the walk; they
    /// are counted in the returned report.
    pub async fn publish(
        &self,
        deployment_id: &DeploymentId,
        output_dirs: &[PathBuf],
    ) -> UploadReport {
        let mut report = UploadReport::default();
        for dir in output_dirs {
            info!(dir = %dir.display(), "Uploading output folder");
            report.merge(self.publish_dir(deployment_id, dir).await);
        }

        if report.is_partial() {
            warn!(
                succeeded = report.files_succeeded,
                failed = report.files_failed,
                "Upload finished with failures"
            );
        } else {
            info!(files = report.files_succeeded, "Upload complete");
        }
        report
    }

    async fn publish_dir(&self, deployment_id: &DeploymentId, root: &Path) -> UploadReport {
        let mut report = UploadReport::default();
        let mut pending = vec![PathBuf::new()];

        while let Some(relative_dir) = pending.pop() {
            let entries = match sorted_entries(&root.join(&relative_dir)).await {
                Ok(entries) => entries,
                Err(e) => {
                    // The files below are unknown; record the directory itself.
                    error!(dir = %relative_dir.display(), error = %e, "Error reading directory");
                    report.record_failure(format!("{}/", relative_dir.display()));
                    continue;
                }
            };

            let mut subdirs = Vec::new();
            for (name, file_type) in entries {
                let relative = relative_dir.join(&name);
                if file_type.is_dir() {
                    subdirs.push(relative);
                } else if file_type.is_file() {
                    let uploaded = match object_key(deployment_id, &relative) {
                        Some(key) => self.upload_with_retry(&root.join(&relative), &key).await,
                        None => {
                            error!(path = %relative.display(), "Path is not valid UTF-8");
                            false
                        }
                    };
                    if uploaded {
                        report.record_success();
                    } else {
                        report.record_failure(relative.to_string_lossy());
                    }
                } else {
                    debug!(path = %relative.display(), "Skipping non-regular file");
                }
            }

            // Reversed so the stack visits subdirectories in name order.
            pending.extend(subdirs.into_iter().rev());
        }

        report
    }

    async fn upload_with_retry(&self, path: &Path, key: &str) -> bool {
        let content_type = content_type_for(path);

        for attempt in 1..=self.retry.max_attempts {
            debug!(attempt, key, "Uploading");
            match self.upload_once(path, key, &content_type).await {
                Ok(()) => {
                    info!(key, "Uploaded");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, key, error = %e, "Upload attempt failed");
                    if attempt == self.retry.max_attempts {
                        error!(key, attempts = attempt, "Giving up on upload");
                        return false;
                    }
                    let delay = self.retry.delay_after(attempt);
                    debug!(delay_ms = delay.as_millis() as u64, "Waiting before retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        false
    }

    async fn upload_once(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<(), PipelineError> {
        let upload_error = |message: String| PipelineError::Upload {
            key: key.to_string(),
            message,
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        self.sink
            .put(key, Bytes::from(bytes), content_type)
            .await
            .map_err(|e| upload_error(e.to_string()))
    }
}

/// Directory entries sorted by name, with their types (symlinks not followed).
async fn sorted_entries(dir: &Path) -> std::io::Result<Vec<(OsString, FileType)>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        entries.push((entry.file_name(), entry.file_type().await?));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}
