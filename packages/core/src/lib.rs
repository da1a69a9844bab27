//! Core domain types for the deploy worker.
//!
//! This crate contains shared types used across all packages:
//! - DeploymentJob and its queue wire format
//! - DeploymentStatus, UploadReport and DeploymentOutcome for results
//! - Stages and events for progress reporting

mod events;
mod job;
mod message;
mod status;

pub use events::{PipelineEvent, Stage};
pub use job::{
    DecodeError, DeploymentId, DeploymentJob, RepositorySlug, ServicePath, WIRE_SEPARATOR,
};
pub use message::MessageId;
pub use status::{DeploymentOutcome, DeploymentStatus, UploadReport};
