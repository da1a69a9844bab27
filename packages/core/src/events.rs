//! Pipeline stages and the events emitted as a job moves through them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeploymentId, DeploymentStatus};

/// Orchestrator states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Building,
    LocatingOutput,
    Publishing,
    Reporting,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Building => "building",
            Stage::LocatingOutput => "locating_output",
            Stage::Publishing => "publishing",
            Stage::Reporting => "reporting",
            Stage::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events broadcast by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A job entered a stage.
    StageEntered {
        deployment_id: DeploymentId,
        stage: Stage,
        timestamp: DateTime<Utc>,
    },
    /// The terminal status was written and the workspace released.
    DeploymentFinished {
        deployment_id: DeploymentId,
        status: DeploymentStatus,
        files_succeeded: u64,
        files_failed: u64,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PipelineEvent::StageEntered { timestamp, .. } => *timestamp,
            PipelineEvent::DeploymentFinished { timestamp, .. } => *timestamp,
        }
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        match self {
            PipelineEvent::StageEntered { deployment_id, .. } => deployment_id,
            PipelineEvent::DeploymentFinished { deployment_id, .. } => deployment_id,
        }
    }

    /// Short description for logging.
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::StageEntered {
                deployment_id,
                stage,
                ..
            } => format!("Deployment {} -> {}", deployment_id, stage),
            PipelineEvent::DeploymentFinished {
                deployment_id,
                status,
                files_succeeded,
                files_failed,
                ..
            } => format!(
                "Deployment {} finished {} ({} uploaded, {} failed)",
                deployment_id, status, files_succeeded, files_failed
            ),
        }
    }
}
