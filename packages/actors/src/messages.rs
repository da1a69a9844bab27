//! Message types for actor communication.

use deploy_core::DeploymentId;
use ractor::RpcReplyPort;

/// Messages for the DeployWorker.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Receive the next delivery and process it, if there is one.
    Poll,

    /// Stop after the job in progress.
    Shutdown,

    /// Get worker counters.
    GetStats { reply: RpcReplyPort<WorkerStats> },
}

/// Counters for one worker since it started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Deliveries taken off the queue.
    pub received: u64,
    /// Jobs that ended with a `SUCCESS` status.
    pub succeeded: u64,
    /// Jobs that ended with a `FAILED` status.
    pub failed: u64,
    /// Payloads that could not be decoded. Left unacknowledged.
    pub malformed: u64,
    /// Jobs whose status could not be persisted. Left unacknowledged.
    pub unacknowledged: u64,
    /// Last job picked up.
    pub last_deployment: Option<DeploymentId>,
}

impl WorkerStats {
    /// Jobs whose status was persisted.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }
}
