//! Work queue transport.
//!
//! A delivery stays outstanding until it is acknowledged. Anything the
//! consumer never acknowledges becomes eligible for redelivery again, in the
//! SurrealDB queue when [`SurrealQueue::requeue_unacked`] runs at startup.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use db::DbError;
use db::repositories::{DeploymentRepository, MessageRepository};
use deploy_core::{DecodeError, DeploymentJob, MessageId};
use tracing::{debug, info};

/// Future type for queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid job: {0}")]
    InvalidJob(#[from] DecodeError),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),
}

/// One message handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Identifies the delivery for acknowledgement.
    pub tag: String,
    pub payload: Vec<u8>,
    /// Set when an earlier delivery of this message was never acknowledged.
    pub redelivered: bool,
}

/// A durable FIFO of deployment messages with explicit acknowledgement.
pub trait WorkQueue: Send + Sync + 'static {
    /// Take the next message, or `None` when the queue is empty.
    fn receive(&self) -> QueueFuture<'_, Option<Delivery>>;

    /// Remove a delivered message for good.
    fn ack<'a>(&'a self, delivery: &'a Delivery) -> QueueFuture<'a, ()>;
}

/// Queue backed by the `deploy_message` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurrealQueue;

impl SurrealQueue {
    /// Create the `PENDING` deployment row and enqueue the job.
    pub async fn submit(&self, job: &DeploymentJob) -> Result<MessageId, QueueError> {
        let payload = job.encode()?;
        DeploymentRepository::create_pending(job).await?;
        let id = MessageRepository::enqueue(payload).await?;
        info!(deployment_id = %job.deployment_id, message_id = %id, "Deployment submitted");
        Ok(id)
    }

    /// Enqueue a raw payload without creating a deployment row.
    pub async fn publish(&self, payload: impl Into<String>) -> Result<MessageId, QueueError> {
        Ok(MessageRepository::enqueue(payload).await?)
    }

    /// Make every unacknowledged delivery eligible again. Call before the
    /// consumer starts.
    pub async fn requeue_unacked(&self) -> Result<usize, QueueError> {
        let count = MessageRepository::requeue_unacked().await?;
        if count > 0 {
            info!(count, "Requeued unacknowledged messages");
        }
        Ok(count)
    }
}

impl WorkQueue for SurrealQueue {
    fn receive(&self) -> QueueFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            let claimed = MessageRepository::claim_next().await?;
            Ok(claimed.map(|record| Delivery {
                tag: record.seq,
                payload: record.payload.into_bytes(),
                redelivered: record.redelivered,
            }))
        })
    }

    fn ack<'a>(&'a self, delivery: &'a Delivery) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            MessageRepository::ack(&delivery.tag).await?;
            debug!(tag = %delivery.tag, "Acknowledged");
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct MemoryQueueState {
    next_tag: u64,
    ready: VecDeque<(Vec<u8>, bool)>,
    outstanding: HashMap<String, Vec<u8>>,
}

/// In-process queue with the same delivery semantics as [`SurrealQueue`].
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryQueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, payload: impl Into<Vec<u8>>) {
        self.state().ready.push_back((payload.into(), false));
    }

    /// Return every outstanding delivery to the front of the queue.
    pub fn requeue_unacked(&self) -> usize {
        let mut state = self.state();
        let mut outstanding: Vec<(String, Vec<u8>)> = state.outstanding.drain().collect();
        outstanding.sort_by(|a, b| a.0.cmp(&b.0));
        let count = outstanding.len();
        for (_, payload) in outstanding.into_iter().rev() {
            state.ready.push_front((payload, true));
        }
        count
    }

    pub fn ready_count(&self) -> usize {
        self.state().ready.len()
    }

    pub fn unacked_count(&self) -> usize {
        self.state().outstanding.len()
    }
}

impl WorkQueue for MemoryQueue {
    fn receive(&self) -> QueueFuture<'_, Option<Delivery>> {
        let delivery = {
            let mut state = self.state();
            match state.ready.pop_front() {
                Some((payload, redelivered)) => {
                    state.next_tag += 1;
                    // Zero-padded so tags sort in delivery order.
                    let tag = format!("{:020}", state.next_tag);
                    state.outstanding.insert(tag.clone(), payload.clone());
                    Some(Delivery {
                        tag,
                        payload,
                        redelivered,
                    })
                }
                None => None,
            }
        };
        Box::pin(async move { Ok(delivery) })
    }

    fn ack<'a>(&'a self, delivery: &'a Delivery) -> QueueFuture<'a, ()> {
        let removed = self.state().outstanding.remove(&delivery.tag);
        Box::pin(async move {
            removed
                .map(|_| ())
                .ok_or_else(|| QueueError::UnknownDelivery(delivery.tag.clone()))
        })
    }
}
