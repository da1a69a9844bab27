//! Worker startup and shutdown.

use std::sync::Arc;

use actors::{SurrealQueue, WorkerArgs, WorkerConfig, WorkerMessage, start_worker};
use db::DbConfig;
use deploy_core::{DeploymentJob, PipelineEvent};
use pipeline::{Pipeline, PipelineConfig, ProcessRunner, SurrealStatusStore};
use storage::Storage;
use tokio::sync::broadcast;

/// Connect to the database, making every unacknowledged message eligible
/// for redelivery.
async fn init_queue() -> Result<SurrealQueue, Box<dyn std::error::Error>> {
    let config = DbConfig::from_env();
    if config.is_memory() {
        tracing::warn!(
            endpoint = %config.endpoint,
            "In-memory database: only this process can submit to the queue, \
             and queued deployments are lost on exit"
        );
    }
    db::init(config).await?;

    let queue = SurrealQueue;
    queue.requeue_unacked().await?;
    Ok(queue)
}

/// Run the consumer until Ctrl-C, then stop after the job in progress.
pub async fn run_worker() -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Initializing deploy worker...");

    let pipeline_config = PipelineConfig::from_env()?;
    let worker_config = WorkerConfig::from_env()?;
    let queue = init_queue().await?;
    let storage = Storage::from_env().await?;

    tokio::fs::create_dir_all(&pipeline_config.workspace_root).await?;
    tracing::info!(
        workspace_root = %pipeline_config.workspace_root.display(),
        git_host = %pipeline_config.git_host,
        "Pipeline configured"
    );

    let (event_tx, event_rx) = broadcast::channel(256);
    let pipeline = Pipeline::new(
        pipeline_config,
        Arc::new(ProcessRunner),
        Arc::new(storage),
        Arc::new(SurrealStatusStore),
    )
    .with_events(event_tx);
    tokio::spawn(log_events(event_rx));

    let (worker, mut handle) = start_worker(WorkerArgs {
        config: worker_config,
        queue: Arc::new(queue),
        handler: Arc::new(pipeline),
    })
    .await?;

    tracing::info!("Deploy worker started, waiting for messages");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutdown requested; finishing the job in progress");
            worker.send_message(WorkerMessage::Shutdown)?;
        }
        joined = &mut handle => {
            joined?;
            tracing::warn!("Worker stopped unexpectedly");
            return Ok(());
        }
    }
    handle.await?;

    tracing::info!("Deploy worker stopped");
    Ok(())
}

/// Record a PENDING deployment and enqueue it.
pub async fn submit(job: DeploymentJob) -> Result<(), Box<dyn std::error::Error>> {
    let config = DbConfig::from_env();
    if config.is_memory() {
        tracing::warn!(
            endpoint = %config.endpoint,
            "In-memory database: no running worker will see this submission"
        );
    }
    db::init(config).await?;

    let message_id = SurrealQueue.submit(&job).await?;
    println!(
        "Submitted deployment {} ({}, {}) as message {}",
        job.deployment_id, job.repository, job.service_path, message_id
    );
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<PipelineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::debug!(
                deployment_id = %event.deployment_id(),
                at = %event.timestamp(),
                "{}",
                event.description()
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
