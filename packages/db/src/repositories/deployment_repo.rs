//! Deployment repository: the status row the worker reports into.

use chrono::{DateTime, Utc};
use deploy_core::{DeploymentId, DeploymentJob, DeploymentOutcome, DeploymentStatus, Stage};
use serde::{Deserialize, Serialize};

use crate::{DbError, get_db};

/// Repository for deployment status records.
pub struct DeploymentRepository;

/// A deployment row as read back from SurrealDB.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentRecord {
    pub repository_slug: Option<String>,
    pub service_path: Option<String>,
    pub status: DeploymentStatus,
    pub failed_stage: Option<Stage>,
    pub failure_reason: Option<String>,
    pub files_succeeded: u64,
    pub files_failed: u64,
    #[serde(default)]
    pub failed_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Struct for creating rows - omits datetime fields to use SurrealDB defaults.
#[derive(Debug, Clone, Serialize)]
struct DeploymentCreate {
    repository_slug: String,
    service_path: String,
    status: DeploymentStatus,
}

impl DeploymentRepository {
    /// Create the `PENDING` row for a job about to be enqueued.
    pub async fn create_pending(job: &DeploymentJob) -> Result<DeploymentRecord, DbError> {
        let db = get_db()?;

        let create_data = DeploymentCreate {
            repository_slug: job.repository.to_string(),
            service_path: job.service_path.to_string(),
            status: DeploymentStatus::Pending,
        };

        let record: Option<DeploymentRecord> = db
            .create(("deployment", job.deployment_id.to_string()))
            .content(create_data)
            .await?;

        record.ok_or_else(|| DbError::Query("Failed to create deployment".into()))
    }

    /// Get a deployment by ID.
    pub async fn get(id: &DeploymentId) -> Result<DeploymentRecord, DbError> {
        let db = get_db()?;

        let record: Option<DeploymentRecord> = db.select(("deployment", id.to_string())).await?;

        record.ok_or_else(|| DbError::NotFound(format!("Deployment not found: {}", id)))
    }

    /// Write the terminal outcome of a run.
    ///
    /// Upserts so a redelivered job whose row was never created still records
    /// its result. Writing the same outcome twice leaves the row unchanged
    /// apart from `updated_at`.
    pub async fn record_outcome(outcome: &DeploymentOutcome) -> Result<DeploymentRecord, DbError> {
        if !outcome.status.is_terminal() {
            return Err(DbError::Query(format!(
                "refusing to record non-terminal status {} for {}",
                outcome.status, outcome.deployment_id
            )));
        }

        let db = get_db()?;

        let mut response = db
            .query(
                r#"
                UPSERT type::thing("deployment", $id) SET
                    status = $status,
                    failed_stage = $failed_stage,
                    failure_reason = $failure_reason,
                    files_succeeded = $files_succeeded,
                    files_failed = $files_failed,
                    failed_paths = $failed_paths,
                    updated_at = time::now()
                RETURN AFTER
                "#,
            )
            .bind(("id", outcome.deployment_id.to_string()))
            .bind(("status", outcome.status.as_str()))
            .bind(("failed_stage", outcome.failed_stage.map(|s| s.as_str())))
            .bind(("failure_reason", outcome.failure_reason.clone()))
            .bind(("files_succeeded", outcome.report.files_succeeded as i64))
            .bind(("files_failed", outcome.report.files_failed as i64))
            .bind(("failed_paths", outcome.report.failed_paths.clone()))
            .await?;

        let records: Vec<DeploymentRecord> = response.take(0)?;

        records.into_iter().next().ok_or_else(|| {
            DbError::Query(format!(
                "Failed to record outcome for deployment {}",
                outcome.deployment_id
            ))
        })
    }

    /// List deployments with the given status.
    pub async fn list_by_status(
        status: DeploymentStatus,
    ) -> Result<Vec<DeploymentRecord>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM deployment WHERE status = $status ORDER BY created_at ASC")
            .bind(("status", status.as_str()))
            .await?;

        let records: Vec<DeploymentRecord> = result.take(0)?;
        Ok(records)
    }
}
