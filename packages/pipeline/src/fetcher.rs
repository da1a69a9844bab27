//! Repository fetcher: shallow clone into the workspace and resolve the
//! service directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deploy_core::{DeploymentJob, Stage};
use tracing::{error, info};

use crate::command::{CommandRunner, CommandSpec};
use crate::error::{CommandError, PipelineError};
use crate::workspace::Workspace;

/// Clones a job's repository and locates its service directory.
#[derive(Clone)]
pub struct RepositoryFetcher {
    runner: Arc<dyn CommandRunner>,
    git_host: String,
    timeout: Duration,
}

impl RepositoryFetcher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        git_host: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            git_host: git_host.into(),
            timeout,
        }
    }

    /// Clone `job.repository` into the workspace root and return the absolute
    /// service directory.
    pub async fn fetch(
        &self,
        job: &DeploymentJob,
        workspace: &Workspace,
    ) -> Result<PathBuf, PipelineError> {
        let relative = job
            .service_path
            .relative()
            .ok_or_else(|| PipelineError::InvalidServicePath(job.service_path.to_string()))?;

        let url = job.repository.clone_url(&self.git_host);
        info!(repository = %job.repository, "Cloning {}", url);

        let spec = CommandSpec::new("git")
            .args(["clone", "--depth", "1", "--single-branch"])
            .arg(url.as_str())
            .arg(workspace.path().to_string_lossy())
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.timeout);

        let output = self.runner.run(&spec).await.map_err(|e| match e {
            CommandError::TimedOut { after, .. } => PipelineError::StageTimedOut {
                stage: Stage::Fetching,
                after,
            },
            other => PipelineError::Clone {
                url: url.clone(),
                message: other.to_string(),
            },
        })?;

        if !output.success() {
            error!(stderr = %output.stderr.trim(), "git clone failed");
            return Err(PipelineError::Clone {
                url,
                message: output.stderr.trim().to_string(),
            });
        }

        let service_dir = workspace.path().join(&relative);
        let is_dir = tokio::fs::metadata(&service_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            error!(service_path = %job.service_path, "Service path not found in repository");
            return Err(PipelineError::ServicePathNotFound(job.service_path.to_string()));
        }

        // A symlinked service directory must not lead outside the clone.
        let root = tokio::fs::canonicalize(workspace.path()).await?;
        let resolved = tokio::fs::canonicalize(&service_dir).await?;
        if !resolved.starts_with(&root) {
            return Err(PipelineError::ServicePathEscapesWorkspace(
                job.service_path.to_string(),
            ));
        }

        info!(service_dir = %resolved.display(), "Repository fetched");
        Ok(resolved)
    }
}
