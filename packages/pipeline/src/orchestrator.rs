//! Job orchestrator: drives one deployment through its stages.
//!
//! ```text
//! Fetching -> Building -> LocatingOutput -> Publishing -> Reporting -> Done
//!     \___________\______________\______________________/
//!                     any fatal error jumps to Reporting
//! ```
//!
//! Reporting always runs, and it is the only place a status is written.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use deploy_core::{
    DeploymentId, DeploymentJob, DeploymentOutcome, PipelineEvent, Stage, UploadReport,
};
use tokio::sync::broadcast;
use tracing::{Instrument, error, info, info_span, warn};

use crate::build::{BuildRunner, ExportStatus};
use crate::command::CommandRunner;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fetcher::RepositoryFetcher;
use crate::locator::locate_outputs;
use crate::publisher::{ArtifactPublisher, ArtifactSink, RetryPolicy};
use crate::reporter::{StatusReporter, StatusStore};
use crate::workspace::Workspace;

/// Last stage a run entered, readable after the run task has died.
#[derive(Clone)]
struct StageTracker(Arc<Mutex<Stage>>);

impl StageTracker {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Stage::Fetching)))
    }

    fn set(&self, stage: Stage) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = stage;
    }

    fn get(&self) -> Stage {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The build-and-publish pipeline.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    fetcher: RepositoryFetcher,
    builder: BuildRunner,
    publisher: ArtifactPublisher,
    reporter: StatusReporter,
    events: Option<broadcast::Sender<PipelineEvent>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        sink: Arc<dyn ArtifactSink>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        let fetcher = RepositoryFetcher::new(
            runner.clone(),
            config.git_host.clone(),
            config.clone_timeout,
        );
        let builder = BuildRunner::new(runner, config.build_timeout);
        let publisher = ArtifactPublisher::new(
            sink,
            RetryPolicy::new(config.upload_max_attempts, config.upload_backoff_base),
        );

        Self {
            config: Arc::new(config),
            fetcher,
            builder,
            publisher,
            reporter: StatusReporter::new(status),
            events: None,
        }
    }

    /// Broadcast stage transitions and results on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one deployment to completion.
    ///
    /// Stage failures become a `FAILED` outcome and are not returned as
    /// errors. `Err` means the status could not be persisted, in which case
    /// the job must not be acknowledged.
    pub async fn run(&self, job: &DeploymentJob) -> Result<DeploymentOutcome, PipelineError> {
        let span = info_span!(
            "deployment",
            deployment_id = %job.deployment_id,
            repository = %job.repository
        );
        self.run_inner(job).instrument(span).await
    }

    async fn run_inner(&self, job: &DeploymentJob) -> Result<DeploymentOutcome, PipelineError> {
        info!(service_path = %job.service_path, "Starting deployment");

        // The stages run in their own task so a panic still ends in a status write.
        let tracker = StageTracker::new();
        let task = {
            let this = self.clone();
            let job = job.clone();
            let tracker = tracker.clone();
            tokio::spawn(
                async move {
                    let mut workspace = None;
                    let result = this.execute(&job, &tracker, &mut workspace).await;
                    (result, workspace)
                }
                .in_current_span(),
            )
        };

        let (result, workspace) = match task.await {
            Ok(finished) => finished,
            Err(e) => {
                let stage = tracker.get();
                error!(%stage, error = %e, "Deployment task aborted");
                (Err((stage, PipelineError::Panicked { stage })), None)
            }
        };

        let outcome = match result {
            Ok(report) => DeploymentOutcome::success(job.deployment_id.clone(), report),
            Err((stage, e)) => {
                error!(%stage, error = %e, "Error during deployment");
                DeploymentOutcome::failed(job.deployment_id.clone(), stage, e.to_string())
            }
        };

        self.enter(&tracker, &job.deployment_id, Stage::Reporting);
        self.reporter.report(&outcome, workspace).await?;

        self.enter(&tracker, &job.deployment_id, Stage::Done);
        self.emit(PipelineEvent::DeploymentFinished {
            deployment_id: job.deployment_id.clone(),
            status: outcome.status,
            files_succeeded: outcome.report.files_succeeded,
            files_failed: outcome.report.files_failed,
            timestamp: Utc::now(),
        });

        Ok(outcome)
    }

    /// Fetching through Publishing. The workspace is handed back through
    /// `workspace` so it can be released after the status write.
    async fn execute(
        &self,
        job: &DeploymentJob,
        tracker: &StageTracker,
        workspace: &mut Option<Workspace>,
    ) -> Result<UploadReport, (Stage, PipelineError)> {
        let id = &job.deployment_id;

        self.enter(tracker, id, Stage::Fetching);
        let acquired = Workspace::acquire(self.config.workspace_dir(id))
            .await
            .map_err(|e| (Stage::Fetching, PipelineError::Workspace(e)))?;
        let workspace = workspace.insert(acquired);
        let service_dir = self
            .fetcher
            .fetch(job, workspace)
            .await
            .map_err(|e| (Stage::Fetching, e))?;

        self.enter(tracker, id, Stage::Building);
        let build = self
            .builder
            .build(&service_dir)
            .await
            .map_err(|e| (Stage::Building, e))?;
        if let ExportStatus::Failed(reason) = &build.export {
            warn!(package_manager = %build.package_manager, %reason, "Continuing without export");
        }

        self.enter(tracker, id, Stage::LocatingOutput);
        let output_dirs = locate_outputs(&service_dir)
            .await
            .map_err(|e| (Stage::LocatingOutput, e))?;

        self.enter(tracker, id, Stage::Publishing);
        Ok(self.publisher.publish(id, &output_dirs).await)
    }

    fn enter(&self, tracker: &StageTracker, deployment_id: &DeploymentId, stage: Stage) {
        tracker.set(stage);
        info!(%stage, "Entering stage");
        self.emit(PipelineEvent::StageEntered {
            deployment_id: deployment_id.clone(),
            stage,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.send(event);
        }
    }
}
