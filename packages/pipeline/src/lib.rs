//! Build-and-publish pipeline for deploy-from-git jobs.
//!
//! A [`Pipeline`] takes one [`deploy_core::DeploymentJob`], clones the
//! repository, builds the service with the package manager its lockfile
//! names, uploads the output directories to object storage and records the
//! terminal status. External effects sit behind three seams:
//!
//! - [`CommandRunner`] for `git` and the package manager
//! - [`ArtifactSink`] for object storage
//! - [`StatusStore`] for the deployment status row

pub mod build;
pub mod command;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod locator;
pub mod orchestrator;
pub mod publisher;
pub mod reporter;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use build::{BuildReport, BuildRunner, ExportStatus, PackageManager};
pub use command::{CommandFuture, CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use config::PipelineConfig;
pub use error::{CommandError, ConfigError, PipelineError};
pub use fetcher::RepositoryFetcher;
pub use locator::{OUTPUT_DIR_NAMES, locate_outputs};
pub use orchestrator::Pipeline;
pub use publisher::{
    ArtifactPublisher, ArtifactSink, OUTPUT_PREFIX, RetryPolicy, SinkFuture, content_type_for,
    object_key,
};
pub use reporter::{StatusFuture, StatusReporter, StatusStore, SurrealStatusStore};
pub use workspace::Workspace;
