//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    // Deployment status records
    db.query(DEPLOYMENT_SCHEMA).await?.check()?;

    // Durable work queue
    db.query(MESSAGE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Deployment table schema.
const DEPLOYMENT_SCHEMA: &str = r#"
-- One row per deployment; the worker only writes the outcome fields
DEFINE TABLE IF NOT EXISTS deployment SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS repository_slug ON deployment TYPE option<string>;
DEFINE FIELD IF NOT EXISTS service_path ON deployment TYPE option<string>;
DEFINE FIELD IF NOT EXISTS status ON deployment TYPE string DEFAULT "PENDING"
    ASSERT $value IN ["PENDING", "SUCCESS", "FAILED"];
DEFINE FIELD IF NOT EXISTS failed_stage ON deployment TYPE option<string>;
DEFINE FIELD IF NOT EXISTS failure_reason ON deployment TYPE option<string>;
DEFINE FIELD IF NOT EXISTS files_succeeded ON deployment TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS files_failed ON deployment TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS failed_paths ON deployment TYPE array<string> DEFAULT [];
DEFINE FIELD IF NOT EXISTS created_at ON deployment TYPE datetime DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON deployment TYPE datetime DEFAULT time::now();

DEFINE INDEX IF NOT EXISTS deployment_status ON deployment FIELDS status;
"#;

/// Work queue table schema.
const MESSAGE_SCHEMA: &str = r#"
-- Queue messages; a row lives until it is acknowledged
DEFINE TABLE IF NOT EXISTS deploy_message SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS payload ON deploy_message TYPE string;
DEFINE FIELD IF NOT EXISTS seq ON deploy_message TYPE string;
DEFINE FIELD IF NOT EXISTS state ON deploy_message TYPE string DEFAULT "ready"
    ASSERT $value IN ["ready", "delivered"];
DEFINE FIELD IF NOT EXISTS delivery_count ON deploy_message TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS redelivered ON deploy_message TYPE bool DEFAULT false;
DEFINE FIELD IF NOT EXISTS enqueued_at ON deploy_message TYPE datetime DEFAULT time::now();

-- FIFO claim order
DEFINE INDEX IF NOT EXISTS message_state_seq ON deploy_message FIELDS state, seq;
"#;
