use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::model::{Event, OutboxEvent};
use crate::relay::OutboxStore;
use crate::repo::{events, outbox};

/// Owns the dual-write path: business row and outbox row commit in the same
/// transaction, so on any crash either both are visible or neither.
#[derive(Clone)]
pub struct TransactionalWriter {
    pool: DbPool,
}

impl TransactionalWriter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts the event and its outbox snapshot atomically.
    ///
    /// Replaying a create for an existing id aborts with `AlreadyExists`
    /// before any outbox row is written, so a replay never publishes twice.
    pub async fn create_event(
        &self,
        event: &Event,
        payload: serde_json::Value,
    ) -> AppResult<i64> {
        if payload.is_null() {
            tracing::warn!(event_id = %event.id, "empty payload for outbox");
        }

        let mut tx = self.pool.begin().await?;

        let inserted = events::create_event(&mut *tx, event).await?;
        if !inserted {
            tracing::info!(event_id = %event.id, "idempotent hit: event already exists");
            tx.rollback().await?;
            return Err(AppError::AlreadyExists);
        }

        let outbox_id = outbox::insert_outbox(&mut *tx, event.id, &payload).await?;
        tx.commit().await?;

        tracing::debug!(event_id = %event.id, outbox_id, "event and outbox committed");
        Ok(outbox_id)
    }
}

#[async_trait]
impl OutboxStore for TransactionalWriter {
    async fn reserve_batch(
        &self,
        lease: Duration,
        limit: i64,
        max_attempts: i32,
    ) -> anyhow::Result<Vec<OutboxEvent>> {
        let mut tx = self.pool.begin().await?;
        let batch = outbox::reserve_batch(&mut *tx, lease, limit, max_attempts).await?;
        tx.commit().await?;
        Ok(batch)
    }

    async fn mark_sent_and_finalize(&self, outbox_id: i64) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let rows = outbox::mark_sent(&mut *tx, outbox_id).await?;
        if rows == 0 {
            anyhow::bail!("outbox record {outbox_id} not found");
        }
        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed_with_backoff(
        &self,
        outbox_id: i64,
        next_attempt_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        outbox::mark_failed_with_backoff(&self.pool, outbox_id, next_attempt_at).await?;
        Ok(())
    }

    async fn mark_gave_up(&self, outbox_id: i64) -> anyhow::Result<()> {
        outbox::mark_gave_up(&self.pool, outbox_id).await?;
        Ok(())
    }
}
