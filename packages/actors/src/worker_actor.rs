//! Worker actor that consumes deployment jobs one at a time.

use std::sync::Arc;
use std::time::Duration;

use deploy_core::{DeploymentJob, DeploymentStatus};
use pipeline::ConfigError;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tracing::{debug, error, info, warn};

use crate::handler::DeploymentHandler;
use crate::messages::{WorkerMessage, WorkerStats};
use crate::queue::{Delivery, WorkQueue};

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Wait before polling again after finding the queue empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    /// Read `WORKER_ID` and `QUEUE_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(id) = std::env::var("WORKER_ID")
            && !id.trim().is_empty()
        {
            config.worker_id = id.trim().to_string();
        }
        if let Ok(raw) = std::env::var("QUEUE_POLL_INTERVAL_MS")
            && !raw.trim().is_empty()
        {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                    var: "QUEUE_POLL_INTERVAL_MS".into(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
            config.poll_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// State for the worker actor.
pub struct WorkerState {
    pub config: WorkerConfig,
    pub queue: Arc<dyn WorkQueue>,
    pub handler: Arc<dyn DeploymentHandler>,
    pub stats: WorkerStats,
    /// Cleared by `Shutdown`; no further polls are acted on.
    pub running: bool,
}

impl WorkerState {
    /// Decode, run and acknowledge one delivery.
    ///
    /// The delivery is acknowledged only once the job's status is persisted.
    async fn process(&mut self, delivery: Delivery) {
        self.stats.received += 1;

        let job = match DeploymentJob::decode(&delivery.payload) {
            Ok(job) => job,
            Err(e) => {
                error!(
                    tag = %delivery.tag,
                    payload = %String::from_utf8_lossy(&delivery.payload),
                    error = %e,
                    "Malformed deployment message; leaving it unacknowledged"
                );
                self.stats.malformed += 1;
                return;
            }
        };

        self.stats.last_deployment = Some(job.deployment_id.clone());
        if delivery.redelivered {
            info!(deployment_id = %job.deployment_id, "Processing redelivered job");
        } else {
            info!(deployment_id = %job.deployment_id, "Processing job");
        }

        let outcome = match self.handler.handle(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    deployment_id = %job.deployment_id,
                    error = %e,
                    "Deployment status not persisted; leaving message unacknowledged"
                );
                self.stats.unacknowledged += 1;
                return;
            }
        };

        match outcome.status {
            DeploymentStatus::Success => self.stats.succeeded += 1,
            _ => self.stats.failed += 1,
        }

        if let Err(e) = self.queue.ack(&delivery).await {
            // The status is already written; a redelivery rewrites it.
            warn!(deployment_id = %job.deployment_id, error = %e, "Failed to acknowledge message");
        } else {
            debug!(deployment_id = %job.deployment_id, "Message acknowledged");
        }
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub config: WorkerConfig,
    pub queue: Arc<dyn WorkQueue>,
    pub handler: Arc<dyn DeploymentHandler>,
}

/// Worker actor that pulls jobs from a [`WorkQueue`] and runs them.
///
/// Jobs are processed strictly one at a time: the next receive happens only
/// after the previous job has been reported and acknowledged.
pub struct DeployWorker;

impl Actor for DeployWorker {
    type Msg = WorkerMessage;
    type State = WorkerState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!("Starting worker: {}", args.config.worker_id);

        myself.send_message(WorkerMessage::Poll)?;

        Ok(WorkerState {
            config: args.config,
            queue: args.queue,
            handler: args.handler,
            stats: WorkerStats::default(),
            running: true,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.running {
                    return Ok(());
                }

                match state.queue.receive().await {
                    Ok(Some(delivery)) => {
                        state.process(delivery).await;
                        // Keep draining; a queued Shutdown is handled first.
                        myself.send_message(WorkerMessage::Poll)?;
                    }
                    Ok(None) => {
                        myself.send_after(state.config.poll_interval, || WorkerMessage::Poll);
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to receive from queue");
                        myself.send_after(state.config.poll_interval, || WorkerMessage::Poll);
                    }
                }
            }

            WorkerMessage::Shutdown => {
                info!("Shutting down worker: {}", state.config.worker_id);
                state.running = false;
                myself.stop(None);
                return Ok(());
            }

            WorkerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats.clone());
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        info!(
            worker_id = %state.config.worker_id,
            completed = state.stats.completed(),
            malformed = state.stats.malformed,
            unacknowledged = state.stats.unacknowledged,
            "Worker stopped"
        );
        Ok(())
    }
}

/// Start a worker actor.
pub async fn start_worker(
    args: WorkerArgs,
) -> Result<(ActorRef<WorkerMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let name = format!("deploy-worker-{}", args.config.worker_id);
    let (actor, handle) = Actor::spawn(Some(name), DeployWorker, args).await?;

    Ok((actor, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, HandlerFuture};
    use crate::queue::MemoryQueue;
    use deploy_core::{DeploymentId, DeploymentOutcome, Stage, UploadReport};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(id: &str) -> WorkerConfig {
        WorkerConfig {
            worker_id: id.to_string(),
            poll_interval: Duration::from_millis(10),
        }
    }

    async fn stats(worker: &ActorRef<WorkerMessage>) -> WorkerStats {
        match worker
            .call(|reply| WorkerMessage::GetStats { reply }, Some(Duration::from_secs(5)))
            .await
            .unwrap()
        {
            ractor::rpc::CallResult::Success(stats) => stats,
            _ => panic!("stats call did not succeed"),
        }
    }

    async fn wait_for(
        worker: &ActorRef<WorkerMessage>,
        done: impl Fn(&WorkerStats) -> bool,
    ) -> WorkerStats {
        for _ in 0..500 {
            let current = stats(worker).await;
            if done(&current) {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker did not reach the expected state");
    }

    fn succeed(job: &DeploymentJob) -> HandlerFuture {
        let outcome =
            DeploymentOutcome::success(job.deployment_id.clone(), UploadReport::default());
        Box::pin(async move { Ok(outcome) })
    }

    #[tokio::test]
    async fn acks_after_status_is_persisted() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("acme/site,.,dep-1");
        queue.push("acme/site,apps/web,dep-2");

        let handler = FnHandler::new(|job: &DeploymentJob| -> HandlerFuture {
            let outcome = if job.deployment_id.as_str() == "dep-2" {
                DeploymentOutcome::failed(
                    job.deployment_id.clone(),
                    Stage::Fetching,
                    "service path 'apps/web' not found",
                )
            } else {
                DeploymentOutcome::success(job.deployment_id.clone(), UploadReport::default())
            };
            Box::pin(async move { Ok(outcome) })
        });

        let (worker, handle) = start_worker(WorkerArgs {
            config: config("ack"),
            queue: queue.clone(),
            handler: Arc::new(handler),
        })
        .await
        .unwrap();

        let stats = wait_for(&worker, |s| s.completed() == 2).await;
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.last_deployment, Some(DeploymentId::parse("dep-2").unwrap()));
        assert_eq!(queue.unacked_count(), 0);
        assert_eq!(queue.ready_count(), 0);

        worker.send_message(WorkerMessage::Shutdown).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unpersisted_status_is_not_acked() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("acme/site,.,dep-3");

        let handler = FnHandler::new(|_: &DeploymentJob| -> HandlerFuture {
            Box::pin(async {
                Err("failed to write deployment status: connection refused".to_string())
            })
        });

        let (worker, handle) = start_worker(WorkerArgs {
            config: config("no-ack"),
            queue: queue.clone(),
            handler: Arc::new(handler),
        })
        .await
        .unwrap();

        let stats = wait_for(&worker, |s| s.unacknowledged == 1).await;
        assert_eq!(stats.completed(), 0);
        assert_eq!(queue.unacked_count(), 1);

        // After a restart the message comes back.
        assert_eq!(queue.requeue_unacked(), 1);

        worker.send_message(WorkerMessage::Shutdown).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_message_is_logged_and_left() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("not-a-valid-message");
        queue.push("acme/site,.,dep-4");
        let calls = Arc::new(AtomicUsize::new(0));

        let handler = {
            let calls = calls.clone();
            FnHandler::new(move |job: &DeploymentJob| -> HandlerFuture {
                calls.fetch_add(1, Ordering::SeqCst);
                succeed(job)
            })
        };

        let (worker, handle) = start_worker(WorkerArgs {
            config: config("malformed"),
            queue: queue.clone(),
            handler: Arc::new(handler),
        })
        .await
        .unwrap();

        let stats = wait_for(&worker, |s| s.received == 2).await;
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.unacked_count(), 1);

        worker.send_message(WorkerMessage::Shutdown).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn processes_one_job_at_a_time_in_order() {
        let queue = Arc::new(MemoryQueue::new());
        for i in 1..=4 {
            queue.push(format!("acme/site,.,seq-{i}"));
        }
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let handler = {
            let (in_flight, max_in_flight, order) =
                (in_flight.clone(), max_in_flight.clone(), order.clone());
            FnHandler::new(move |job: &DeploymentJob| -> HandlerFuture {
                let (in_flight, max_in_flight, order) =
                    (in_flight.clone(), max_in_flight.clone(), order.clone());
                let job = job.clone();
                Box::pin(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    order.lock().unwrap().push(job.deployment_id.to_string());
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(DeploymentOutcome::success(job.deployment_id, UploadReport::default()))
                })
            })
        };

        let (worker, handle) = start_worker(WorkerArgs {
            config: config("sequential"),
            queue: queue.clone(),
            handler: Arc::new(handler),
        })
        .await
        .unwrap();

        wait_for(&worker, |s| s.completed() == 4).await;
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*order.lock().unwrap(), vec!["seq-1", "seq-2", "seq-3", "seq-4"]);

        worker.send_message(WorkerMessage::Shutdown).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_job_in_progress() {
        let queue = Arc::new(MemoryQueue::new());
        for i in 1..=3 {
            queue.push(format!("acme/site,.,stop-{i}"));
        }
        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

        let handler = FnHandler::new(move |job: &DeploymentJob| -> HandlerFuture {
            let started_tx = started_tx.clone();
            let job = job.clone();
            Box::pin(async move {
                let _ = started_tx.send(job.deployment_id.clone());
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(DeploymentOutcome::success(job.deployment_id, UploadReport::default()))
            })
        });

        let (worker, handle) = start_worker(WorkerArgs {
            config: config("shutdown"),
            queue: queue.clone(),
            handler: Arc::new(handler),
        })
        .await
        .unwrap();

        let first = started_rx.recv().await.unwrap();
        assert_eq!(first.as_str(), "stop-1");
        worker.send_message(WorkerMessage::Shutdown).unwrap();
        handle.await.unwrap();

        // The first job finished and was acknowledged; the rest were never taken.
        assert_eq!(queue.unacked_count(), 0);
        assert_eq!(queue.ready_count(), 2);
    }
}
