//! Deployment status, upload accounting, and the terminal outcome record.

use serde::{Deserialize, Serialize};

use crate::{DeploymentId, Stage};

/// Lifecycle of a deployment record: `PENDING -> {SUCCESS, FAILED}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Set by the submitter before the worker picks the job up.
    #[default]
    Pending,
    Success,
    Failed,
}

impl DeploymentStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Success => "SUCCESS",
            DeploymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DeploymentStatus::Pending),
            "SUCCESS" => Some(DeploymentStatus::Success),
            "FAILED" => Some(DeploymentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file upload accounting for one job, across all output directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadReport {
    pub files_succeeded: u64,
    pub files_failed: u64,
    /// Paths relative to their output directory.
    pub failed_paths: Vec<String>,
}

impl UploadReport {
    pub fn record_success(&mut self) {
        self.files_succeeded += 1;
    }

    pub fn record_failure(&mut self, relative_path: impl Into<String>) {
        self.files_failed += 1;
        self.failed_paths.push(relative_path.into());
    }

    /// Fold another directory's report into this one.
    pub fn merge(&mut self, other: UploadReport) {
        self.files_succeeded += other.files_succeeded;
        self.files_failed += other.files_failed;
        self.failed_paths.extend(other.failed_paths);
    }

    pub fn total(&self) -> u64 {
        self.files_succeeded + self.files_failed
    }

    pub fn is_partial(&self) -> bool {
        self.files_failed > 0
    }
}

/// The terminal result of one pipeline run, as written to the status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub deployment_id: DeploymentId,
    pub status: DeploymentStatus,
    /// Stage whose fatal error ended the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub report: UploadReport,
}

impl DeploymentOutcome {
    /// A run that completed the publish walk. Individual file failures stay
    /// in `report` and do not change the status.
    pub fn success(deployment_id: DeploymentId, report: UploadReport) -> Self {
        Self {
            deployment_id,
            status: DeploymentStatus::Success,
            failed_stage: None,
            failure_reason: None,
            report,
        }
    }

    pub fn failed(deployment_id: DeploymentId, stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            deployment_id,
            status: DeploymentStatus::Failed,
            failed_stage: Some(stage),
            failure_reason: Some(reason.into()),
            report: UploadReport::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&DeploymentStatus::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
        assert_eq!(DeploymentStatus::parse("FAILED"), Some(DeploymentStatus::Failed));
        assert_eq!(DeploymentStatus::parse("failed"), None);
    }

    #[test]
    fn only_success_and_failed_are_terminal() {
        assert!(!DeploymentStatus::Pending.is_terminal());
        assert!(DeploymentStatus::Success.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
    }

    #[test]
    fn merge_accumulates_across_directories() {
        let mut dist = UploadReport::default();
        dist.record_success();
        dist.record_failure("a.js");

        let mut public = UploadReport::default();
        public.record_success();
        public.record_success();
        public.record_failure("img/logo.png");

        dist.merge(public);
        assert_eq!(dist.files_succeeded, 3);
        assert_eq!(dist.files_failed, 2);
        assert_eq!(dist.failed_paths, vec!["a.js", "img/logo.png"]);
        assert_eq!(dist.total(), 5);
        assert!(dist.is_partial());
    }
}
