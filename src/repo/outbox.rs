use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::model::{AggregateType, OutboxEvent, OutboxEventType, OutboxStatus};

const INSERT_OUTBOX: &str = r#"
INSERT INTO outbox_event (
    aggregate_id, aggregate_type, event_type, payload, status,
    attempts, next_attempt_at, created_at
)
VALUES ($1, $2, $3, $4, $5, 0, now(), now())
RETURNING id
"#;

// Eligible rows are picked FIFO by id with skip-locked semantics, then their
// lease is pushed into the future in the same statement. Rows locked by a
// concurrent poller are passed over, not waited on.
const RESERVE_BATCH: &str = r#"
WITH picked AS (
    SELECT id
    FROM outbox_event
    WHERE status IN ('NEW', 'FAILED')
      AND next_attempt_at <= now()
      AND attempts < $3
    ORDER BY id
    FOR UPDATE SKIP LOCKED
    LIMIT $2
)
UPDATE outbox_event AS o
SET next_attempt_at = now() + make_interval(secs => $1)
FROM picked
WHERE o.id = picked.id
RETURNING o.id, o.aggregate_id, o.aggregate_type, o.event_type, o.payload,
          o.status, o.attempts, o.next_attempt_at, o.created_at
"#;

const MARK_FAILED: &str = r#"
UPDATE outbox_event
SET status = $2, attempts = attempts + 1, next_attempt_at = $3
WHERE id = $1
"#;

const MARK_GAVE_UP: &str = r#"
UPDATE outbox_event
SET status = $2, attempts = attempts + 1, next_attempt_at = now()
WHERE id = $1
"#;

const MARK_SENT: &str = "UPDATE outbox_event SET status = $2 WHERE id = $1";

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    aggregate_id: Uuid,
    aggregate_type: String,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = sqlx::Error;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status: OutboxStatus = row
            .status
            .parse()
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let aggregate_type: AggregateType = row
            .aggregate_type
            .parse()
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let event_type: OutboxEventType = row
            .event_type
            .parse()
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;

        Ok(OutboxEvent {
            id: row.id,
            aggregate_id: row.aggregate_id,
            aggregate_type,
            event_type,
            payload: row.payload,
            status,
            attempts: row.attempts,
            next_attempt_at: row.next_attempt_at,
            created_at: row.created_at,
        })
    }
}

/// Appends a NEW publish intent. Must run inside the same transaction as the
/// business insert.
pub async fn insert_outbox<'e>(
    executor: impl PgExecutor<'e>,
    aggregate_id: Uuid,
    payload: &serde_json::Value,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(INSERT_OUTBOX)
        .bind(aggregate_id)
        .bind(AggregateType::Event.as_str())
        .bind(OutboxEventType::EventCreated.as_str())
        .bind(payload)
        .bind(OutboxStatus::New.as_str())
        .fetch_one(executor)
        .await
}

/// Reserves up to `limit` eligible records, pushing each record's
/// `next_attempt_at` to `now() + lease` so other pollers cannot re-select
/// them inside the lease window.
pub async fn reserve_batch<'e>(
    executor: impl PgExecutor<'e>,
    lease: Duration,
    limit: i64,
    max_attempts: i32,
) -> Result<Vec<OutboxEvent>, sqlx::Error> {
    let rows: Vec<OutboxRow> = sqlx::query_as(RESERVE_BATCH)
        .bind(lease.as_secs_f64())
        .bind(limit)
        .bind(max_attempts)
        .fetch_all(executor)
        .await?;

    rows.into_iter().map(OutboxEvent::try_from).collect()
}

pub async fn mark_failed_with_backoff<'e>(
    executor: impl PgExecutor<'e>,
    outbox_id: i64,
    next_attempt_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(MARK_FAILED)
        .bind(outbox_id)
        .bind(OutboxStatus::Failed.as_str())
        .bind(next_attempt_at)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn mark_gave_up<'e>(
    executor: impl PgExecutor<'e>,
    outbox_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(MARK_GAVE_UP)
        .bind(outbox_id)
        .bind(OutboxStatus::GaveUp.as_str())
        .execute(executor)
        .await?;
    Ok(())
}

/// Flips the record to SENT leaving `attempts` intact. Returns the affected
/// row count so callers can fail loudly when the record vanished.
pub async fn mark_sent<'e>(
    executor: impl PgExecutor<'e>,
    outbox_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(MARK_SENT)
        .bind(outbox_id)
        .bind(OutboxStatus::Sent.as_str())
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
