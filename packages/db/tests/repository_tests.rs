#![allow(clippy::disallowed_methods)]

mod common;

use deploy_core::{
    DeploymentId, DeploymentJob, DeploymentOutcome, DeploymentStatus, RepositorySlug, ServicePath,
    Stage, UploadReport,
};
use std::error::Error;

use db::{DbError, repositories::DeploymentRepository, repositories::MessageRepository};

fn job(id: &str) -> DeploymentJob {
    DeploymentJob::new(
        RepositorySlug::parse("acme/site").unwrap(),
        ServicePath::new("apps/web"),
        DeploymentId::parse(id).unwrap(),
    )
}

// One test per binary: the global connection is bound to the runtime that opened it.
#[tokio::test]
async fn test_repositories() -> Result<(), Box<dyn Error>> {
    let _guard = common::setup_db().await?;
    deployment_repository().await?;
    message_repository().await?;
    Ok(())
}

async fn deployment_repository() -> Result<(), Box<dyn Error>> {
    // create_pending / get
    let pending = job("dep-1");
    let created = DeploymentRepository::create_pending(&pending).await?;
    assert_eq!(created.status, DeploymentStatus::Pending);
    assert_eq!(created.repository_slug.as_deref(), Some("acme/site"));
    assert_eq!(created.service_path.as_deref(), Some("apps/web"));

    let loaded = DeploymentRepository::get(&pending.deployment_id).await?;
    assert_eq!(loaded.status, DeploymentStatus::Pending);

    // record_outcome: success with a partial upload report
    let mut report = UploadReport::default();
    for _ in 0..9 {
        report.record_success();
    }
    report.record_failure("static/app.js");
    let outcome = DeploymentOutcome::success(pending.deployment_id.clone(), report);
    let updated = DeploymentRepository::record_outcome(&outcome).await?;
    assert_eq!(updated.status, DeploymentStatus::Success);
    assert_eq!(updated.files_succeeded, 9);
    assert_eq!(updated.files_failed, 1);
    assert_eq!(updated.failed_paths, vec!["static/app.js".to_string()]);
    assert_eq!(updated.repository_slug.as_deref(), Some("acme/site"));

    // Writing the same outcome again is idempotent.
    let again = DeploymentRepository::record_outcome(&outcome).await?;
    assert_eq!(again.status, DeploymentStatus::Success);
    assert_eq!(again.files_failed, 1);

    // record_outcome: failure carries stage and reason, and works without a pending row
    let orphan = DeploymentId::parse("dep-orphan")?;
    let failed = DeploymentOutcome::failed(orphan.clone(), Stage::Building, "no lockfile found");
    let recorded = DeploymentRepository::record_outcome(&failed).await?;
    assert_eq!(recorded.status, DeploymentStatus::Failed);
    assert_eq!(recorded.failed_stage, Some(Stage::Building));
    assert_eq!(recorded.failure_reason.as_deref(), Some("no lockfile found"));
    assert_eq!(recorded.files_succeeded, 0);

    let failed_rows = DeploymentRepository::list_by_status(DeploymentStatus::Failed).await?;
    assert_eq!(failed_rows.len(), 1);

    // Non-terminal outcomes are rejected.
    let mut bogus = DeploymentOutcome::success(orphan.clone(), UploadReport::default());
    bogus.status = DeploymentStatus::Pending;
    assert!(matches!(
        DeploymentRepository::record_outcome(&bogus).await,
        Err(DbError::Query(_))
    ));

    let missing = DeploymentRepository::get(&DeploymentId::parse("nope")?).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));

    Ok(())
}

async fn message_repository() -> Result<(), Box<dyn Error>> {
    // Empty queue yields nothing.
    assert!(MessageRepository::claim_next().await?.is_none());

    // FIFO claim order
    let first = MessageRepository::enqueue("acme/site,.,dep-1").await?;
    let second = MessageRepository::enqueue("acme/site,apps/web,dep-2").await?;
    assert!(first < second);

    let claimed = MessageRepository::claim_next().await?.ok_or("expected a message")?;
    assert_eq!(claimed.payload, "acme/site,.,dep-1");
    assert_eq!(claimed.state, "delivered");
    assert_eq!(claimed.delivery_count, 1);
    assert!(!claimed.redelivered);

    // Acknowledge removes the row.
    MessageRepository::ack(&claimed.seq).await?;
    assert!(matches!(
        MessageRepository::get(&claimed.seq).await,
        Err(DbError::NotFound(_))
    ));
    assert!(matches!(
        MessageRepository::ack(&claimed.seq).await,
        Err(DbError::NotFound(_))
    ));

    // An unacknowledged delivery is not handed out again until requeued.
    let unacked = MessageRepository::claim_next().await?.ok_or("expected a message")?;
    assert_eq!(unacked.seq, second.to_string());
    assert!(MessageRepository::claim_next().await?.is_none());
    assert_eq!(MessageRepository::count_in_state("delivered").await?, 1);

    let requeued = MessageRepository::requeue_unacked().await?;
    assert_eq!(requeued, 1);
    assert_eq!(MessageRepository::count_in_state("ready").await?, 1);

    let redelivered = MessageRepository::claim_next().await?.ok_or("expected a message")?;
    assert_eq!(redelivered.seq, second.to_string());
    assert_eq!(redelivered.delivery_count, 2);
    assert!(redelivered.redelivered);

    MessageRepository::ack(&redelivered.seq).await?;
    assert_eq!(MessageRepository::count_in_state("ready").await?, 0);
    assert_eq!(MessageRepository::count_in_state("delivered").await?, 0);

    Ok(())
}
