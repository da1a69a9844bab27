//! Actor system for the deployment worker.
//!
//! # Architecture
//!
//! - `DeployWorker` - Pulls deployment messages from a `WorkQueue`, runs each
//!   one through a `DeploymentHandler` and acknowledges it once its status is
//!   persisted
//! - `SurrealQueue` / `MemoryQueue` - Durable and in-process queue transports
//!
//! # Usage
//!
//! ```ignore
//! use actors::{WorkerArgs, WorkerConfig, WorkerMessage, SurrealQueue, start_worker};
//!
//! let (worker, handle) = start_worker(WorkerArgs {
//!     config: WorkerConfig::from_env()?,
//!     queue: Arc::new(SurrealQueue),
//!     handler: Arc::new(pipeline),
//! })
//! .await?;
//!
//! worker.send_message(WorkerMessage::Shutdown)?;
//! handle.await?;
//! ```

mod handler;
mod messages;
mod queue;
mod worker_actor;

pub use handler::{DeploymentHandler, FnHandler, HandlerFuture, HandlerResult};
pub use messages::{WorkerMessage, WorkerStats};
pub use queue::{Delivery, MemoryQueue, QueueError, QueueFuture, SurrealQueue, WorkQueue};
pub use worker_actor::{DeployWorker, WorkerArgs, WorkerConfig, WorkerState, start_worker};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
