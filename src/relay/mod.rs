//! Outbox relay: a single poller draining leased batches into a bounded
//! queue consumed by a pool of workers.
//!
//! The relay only knows two capabilities: an [`OutboxStore`] to reserve and
//! finalise records, and a [`Producer`] to hand payloads to the broker. The
//! store is the synchronisation authority; workers share nothing but the
//! queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::metrics;
use crate::model::OutboxEvent;
use crate::utils::next_backoff_with_jitter;

/// Outcome of a produce call after the producer's own retry budget.
#[derive(Debug, Error)]
pub enum ProduceError {
    /// Broker classified the request as never-retryable.
    #[error("permanent broker error: {0}")]
    Permanent(#[source] anyhow::Error),

    /// Retryable failures exhausted the per-call attempt budget.
    #[error("produce failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Cancellation fired mid-call; no state change.
    #[error("produce canceled")]
    Canceled,
}

/// Reservation and finalisation capability consumed by the relay.
#[async_trait]
pub trait OutboxStore: Send + Sync + 'static {
    async fn reserve_batch(
        &self,
        lease: Duration,
        limit: i64,
        max_attempts: i32,
    ) -> anyhow::Result<Vec<OutboxEvent>>;

    async fn mark_sent_and_finalize(&self, outbox_id: i64) -> anyhow::Result<()>;

    async fn mark_failed_with_backoff(
        &self,
        outbox_id: i64,
        next_attempt_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn mark_gave_up(&self, outbox_id: i64) -> anyhow::Result<()>;
}

/// Producer capability; `Ok` means the broker durably acknowledged.
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    async fn produce(
        &self,
        cancel: &CancellationToken,
        outbox_id: i64,
        payload: &[u8],
    ) -> Result<(), ProduceError>;
}

pub struct Relay<S, P> {
    store: Arc<S>,
    producer: Arc<P>,
    config: RelayConfig,
}

impl<S: OutboxStore, P: Producer> Relay<S, P> {
    pub fn new(store: Arc<S>, producer: Arc<P>, config: RelayConfig) -> Self {
        Self {
            store,
            producer,
            config,
        }
    }

    /// Runs the poller and worker pool until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            lease = ?self.config.lease,
            poll_period = ?self.config.poll_period,
            "relay started"
        );

        let queue_capacity = (self.config.batch_size as usize) * 2;
        let (tx, rx) = mpsc::channel::<OutboxEvent>(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            let relay = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                relay.worker(worker_id, rx, cancel).await;
            }));
        }

        self.poll_loop(tx, cancel).await;

        for (worker_id, handle) in workers.into_iter().enumerate() {
            if let Err(err) = handle.await {
                tracing::error!(worker_id, error = %err, "relay worker panicked");
            }
        }
        tracing::info!("relay stopped");
    }

    async fn poll_loop(&self, tx: mpsc::Sender<OutboxEvent>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        'poll: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("relay poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let batch = match self
                        .store
                        .reserve_batch(
                            self.config.lease,
                            self.config.batch_size,
                            self.config.max_attempts,
                        )
                        .await
                    {
                        Ok(batch) => batch,
                        Err(err) => {
                            // Transient store failure: next tick retries.
                            tracing::error!(error = %err, "reserve outbox batch failed");
                            continue;
                        }
                    };

                    if !batch.is_empty() {
                        tracing::debug!(reserved = batch.len(), "reserved outbox batch");
                    }

                    for event in batch {
                        // A full queue blocks here, backpressuring the poller
                        // so leases are not churned faster than workers drain.
                        tokio::select! {
                            result = tx.send(event) => {
                                if result.is_err() {
                                    break 'poll;
                                }
                            }
                            _ = cancel.cancelled() => break 'poll,
                        }
                    }
                }
            }
        }
    }

    async fn worker(
        &self,
        worker_id: usize,
        rx: Arc<Mutex<mpsc::Receiver<OutboxEvent>>>,
        cancel: CancellationToken,
    ) {
        tracing::info!(worker_id, "relay worker started");
        loop {
            let event = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    event = rx.recv() => event,
                }
            };

            match event {
                Some(event) => self.process_one(worker_id, event, &cancel).await,
                None => {
                    tracing::info!(worker_id, "relay worker stopping");
                    return;
                }
            }
        }
    }

    /// Drives one reserved record to a terminal or retry state.
    async fn process_one(&self, worker_id: usize, event: OutboxEvent, cancel: &CancellationToken) {
        let outbox_id = event.id;
        tracing::debug!(outbox_id, worker_id, attempts = event.attempts, "relay processing record");

        let payload = event.payload.to_string().into_bytes();

        match self.producer.produce(cancel, outbox_id, &payload).await {
            Ok(()) => {
                tracing::info!(outbox_id, "record sent to broker");
                if let Err(err) = self.store.mark_sent_and_finalize(outbox_id).await {
                    // The message is already on the broker; re-sending would
                    // double-publish, so the record is retired instead.
                    tracing::error!(
                        outbox_id,
                        error = %err,
                        "finalisation failed after broker ack, retiring record"
                    );
                    metrics::RELAY_RECORDS_TOTAL
                        .with_label_values(&["gave_up"])
                        .inc();
                    if let Err(err) = self.store.mark_gave_up(outbox_id).await {
                        tracing::error!(outbox_id, error = %err, "mark gave_up failed");
                    }
                    return;
                }
                metrics::RELAY_RECORDS_TOTAL.with_label_values(&["sent"]).inc();
                tracing::debug!(outbox_id, worker_id, "relay record completed");
            }
            Err(ProduceError::Canceled) => {
                // Leave the row untouched; the lease expires and the record
                // becomes eligible again.
                tracing::debug!(outbox_id, "produce canceled, record left for re-reservation");
            }
            Err(ProduceError::Permanent(err)) => {
                // The broker will reject this record on every retry; retire
                // it immediately with a single attempts bump.
                tracing::error!(outbox_id, error = %err, "permanent broker error, retiring record");
                metrics::RELAY_RECORDS_TOTAL
                    .with_label_values(&["gave_up"])
                    .inc();
                if let Err(err) = self.store.mark_gave_up(outbox_id).await {
                    tracing::error!(outbox_id, error = %err, "mark gave_up failed");
                }
            }
            Err(err @ ProduceError::Exhausted { .. }) => {
                tracing::error!(outbox_id, error = %err, "produce failed");
                self.finalize_failed(outbox_id, event.attempts).await;
            }
        }
    }

    /// Record-level finalisation policy for exhausted retryable failures.
    /// Decisions use the record's `attempts` counter, never the producer's
    /// per-call retry count.
    async fn finalize_failed(&self, outbox_id: i64, attempts: i32) {
        if attempts + 1 >= self.config.max_attempts {
            metrics::RELAY_RECORDS_TOTAL
                .with_label_values(&["gave_up"])
                .inc();
            if let Err(err) = self.store.mark_gave_up(outbox_id).await {
                tracing::error!(outbox_id, error = %err, "mark gave_up failed");
            }
            return;
        }

        let backoff = next_backoff_with_jitter(attempts.max(0) as u32);
        let next_attempt_at = Utc::now()
            + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::minutes(30));
        metrics::RELAY_RECORDS_TOTAL
            .with_label_values(&["failed"])
            .inc();
        if let Err(err) = self
            .store
            .mark_failed_with_backoff(outbox_id, next_attempt_at)
            .await
        {
            tracing::error!(outbox_id, error = %err, "mark failed failed");
        }
    }
}
