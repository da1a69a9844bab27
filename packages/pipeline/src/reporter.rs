//! Status reporter: persist the terminal status, then release the workspace.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use db::DbError;
use db::repositories::DeploymentRepository;
use deploy_core::DeploymentOutcome;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::workspace::Workspace;

/// Future type for status stores.
pub type StatusFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DbError>> + Send + 'a>>;

/// Where deployment outcomes are persisted.
pub trait StatusStore: Send + Sync + 'static {
    fn record<'a>(&'a self, outcome: &'a DeploymentOutcome) -> StatusFuture<'a>;
}

/// Writes outcomes to the `deployment` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurrealStatusStore;

impl StatusStore for SurrealStatusStore {
    fn record<'a>(&'a self, outcome: &'a DeploymentOutcome) -> StatusFuture<'a> {
        Box::pin(async move {
            DeploymentRepository::record_outcome(outcome).await?;
            Ok(())
        })
    }
}

/// Writes exactly one terminal status per run.
#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn StatusStore>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Persist `outcome`, then remove the workspace.
    ///
    /// Cleanup runs whether or not the write succeeded, and a cleanup failure
    /// is only logged. A failed write is returned so the message is not
    /// acknowledged.
    pub async fn report(
        &self,
        outcome: &DeploymentOutcome,
        workspace: Option<Workspace>,
    ) -> Result<(), PipelineError> {
        let written = self.store.record(outcome).await;
        match &written {
            Ok(()) => info!(
                "Deployment {} status updated to {}",
                outcome.deployment_id, outcome.status
            ),
            Err(e) => error!(
                deployment_id = %outcome.deployment_id,
                status = %outcome.status,
                error = %e,
                "Failed to write deployment status"
            ),
        }

        if let Some(workspace) = workspace {
            let path = workspace.path().to_path_buf();
            match workspace.release().await {
                Ok(()) => info!(path = %path.display(), "Cleaned up workspace"),
                Err(e) => warn!(path = %path.display(), error = %e, "Error cleaning up workspace"),
            }
        }

        written.map_err(|e| PipelineError::StatusWrite(e.to_string()))
    }
}
