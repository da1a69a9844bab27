//! Repository implementations for database operations.

mod deployment_repo;
mod message_repo;

pub use deployment_repo::{DeploymentRecord, DeploymentRepository};
pub use message_repo::{MessageRecord, MessageRepository};
