//! Error types for the build-and-publish pipeline.

use std::path::PathBuf;
use std::time::Duration;

use deploy_core::Stage;
use thiserror::Error;

/// Errors that can occur while running a deployment.
///
/// Every variant except [`PipelineError::ExportStepFailed`] and
/// [`PipelineError::Upload`] is fatal for the job.
#[derive(Debug, Error)]
pub enum PipelineError {
    // Repository fetch
    #[error("failed to clone repository {url}: {message}")]
    Clone { url: String, message: String },

    #[error("service path '{0}' is not a relative path inside the repository")]
    InvalidServicePath(String),

    #[error("service path '{0}' not found in repository")]
    ServicePathNotFound(String),

    #[error("service path '{0}' resolves outside the workspace")]
    ServicePathEscapesWorkspace(String),

    // Build
    #[error("no lockfile found in {}", .0.display())]
    NoLockfileFound(PathBuf),

    #[error(
        "build command `{command}` failed (exit code {}): {}",
        exit_code.map_or("none".to_string(), |c| c.to_string()),
        last_line(stderr)
    )]
    BuildCommandFailed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("export command `{command}` failed: {message}")]
    ExportStepFailed { command: String, message: String },

    #[error("{stage} timed out after {after:?}")]
    StageTimedOut { stage: Stage, after: Duration },

    // Output
    #[error("no output directory found in {}", .0.display())]
    NoOutputFound(PathBuf),

    #[error("upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    // Bookkeeping
    #[error("workspace error: {0}")]
    Workspace(std::io::Error),

    #[error("failed to write deployment status: {0}")]
    StatusWrite(String),

    #[error("{stage} panicked")]
    Panicked { stage: Stage },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the error is absorbed by its stage without failing the job.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::ExportStepFailed { .. } | PipelineError::Upload { .. }
        )
    }
}

fn last_line(output: &str) -> &str {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {after:?}")]
    TimedOut { program: String, after: Duration },

    #[error("I/O error waiting for `{program}`: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}={value}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}
