//! Deployment handler trait.

use std::future::Future;
use std::pin::Pin;

use deploy_core::{DeploymentJob, DeploymentOutcome};
use pipeline::Pipeline;

/// Result type for deployment handlers.
///
/// `Ok` means the terminal status was persisted and the delivery may be
/// acknowledged. `Err` means it was not.
pub type HandlerResult = Result<DeploymentOutcome, String>;

/// Future type for async deployment handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Runs one decoded deployment job to a persisted outcome.
pub trait DeploymentHandler: Send + Sync + 'static {
    fn handle(&self, job: &DeploymentJob) -> HandlerFuture;
}

impl DeploymentHandler for Pipeline {
    fn handle(&self, job: &DeploymentJob) -> HandlerFuture {
        let pipeline = self.clone();
        let job = job.clone();
        Box::pin(async move { pipeline.run(&job).await.map_err(|e| e.to_string()) })
    }
}

/// A simple function-based deployment handler.
pub struct FnHandler<F>
where
    F: Fn(&DeploymentJob) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&DeploymentJob) -> HandlerFuture + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> DeploymentHandler for FnHandler<F>
where
    F: Fn(&DeploymentJob) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, job: &DeploymentJob) -> HandlerFuture {
        (self.handler)(job)
    }
}

