//! Message repository: the durable work queue table.
//!
//! A message is `ready` until a consumer claims it, `delivered` until that
//! consumer acknowledges it (the row is deleted), and goes back to `ready`
//! when [`MessageRepository::requeue_unacked`] runs after a consumer restart.

use deploy_core::MessageId;
use serde::{Deserialize, Serialize};

use crate::{DbError, get_db};

/// Repository for queue messages.
pub struct MessageRepository;

/// A queue message row.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    pub payload: String,
    /// Record key, also the FIFO sort key.
    pub seq: String,
    pub state: String,
    pub delivery_count: u32,
    #[serde(default)]
    pub redelivered: bool,
}

#[derive(Debug, Clone, Serialize)]
struct MessageCreate {
    payload: String,
    seq: String,
    state: &'static str,
}

impl MessageRepository {
    /// Append a payload to the tail of the queue.
    pub async fn enqueue(payload: impl Into<String>) -> Result<MessageId, DbError> {
        let db = get_db()?;
        let id = MessageId::new();

        let record: Option<MessageRecord> = db
            .create(("deploy_message", id.to_string()))
            .content(MessageCreate {
                payload: payload.into(),
                seq: id.to_string(),
                state: "ready",
            })
            .await?;

        record
            .map(|_| id)
            .ok_or_else(|| DbError::Query("Failed to enqueue message".into()))
    }

    /// Claim the oldest ready message, marking it delivered.
    pub async fn claim_next() -> Result<Option<MessageRecord>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT * FROM deploy_message
                WHERE state = "ready"
                ORDER BY seq ASC
                LIMIT 1
                "#,
            )
            .await?;
        let candidates: Vec<MessageRecord> = result.take(0)?;

        let Some(candidate) = candidates.into_iter().next() else {
            return Ok(None);
        };

        // The state guard keeps a concurrent claimer from taking it twice.
        let mut result = db
            .query(
                r#"
                UPDATE type::thing("deploy_message", $id)
                SET state = "delivered", delivery_count += 1
                WHERE state = "ready"
                RETURN AFTER
                "#,
            )
            .bind(("id", candidate.seq.clone()))
            .await?;
        let claimed: Vec<MessageRecord> = result.take(0)?;

        Ok(claimed.into_iter().next())
    }

    /// Acknowledge a delivered message, removing it from the queue.
    pub async fn ack(seq: &str) -> Result<(), DbError> {
        let db = get_db()?;

        let removed: Option<MessageRecord> = db.delete(("deploy_message", seq.to_string())).await?;

        removed
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("Message not found: {}", seq)))
    }

    /// Return every unacknowledged delivery to the ready state.
    ///
    /// Returns the number of messages made eligible for redelivery.
    pub async fn requeue_unacked() -> Result<usize, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPDATE deploy_message
                SET state = "ready", redelivered = true
                WHERE state = "delivered"
                RETURN AFTER
                "#,
            )
            .await?;
        let requeued: Vec<MessageRecord> = result.take(0)?;

        Ok(requeued.len())
    }

    /// Get a message by its sequence key.
    pub async fn get(seq: &str) -> Result<MessageRecord, DbError> {
        let db = get_db()?;

        let record: Option<MessageRecord> = db.select(("deploy_message", seq.to_string())).await?;

        record.ok_or_else(|| DbError::NotFound(format!("Message not found: {}", seq)))
    }

    /// Count messages in a given state.
    pub async fn count_in_state(state: &str) -> Result<u64, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT count() AS count FROM deploy_message WHERE state = $state GROUP ALL")
            .bind(("state", state.to_string()))
            .await?;

        #[derive(Deserialize)]
        struct Count {
            count: i64,
        }

        let counts: Vec<Count> = result.take(0)?;
        Ok(counts.first().map_or(0, |c| c.count as u64))
    }
}
