//! Relay engine tests against in-memory capabilities.
//!
//! The store mock mirrors the reservation contract (eligibility, lease,
//! attempt accounting); the producer is scripted per call. Together they
//! exercise the full status machine without Postgres or Kafka.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use calendar_server::config::RelayConfig;
use calendar_server::model::{AggregateType, OutboxEvent, OutboxEventType, OutboxStatus};
use calendar_server::relay::{OutboxStore, ProduceError, Producer, Relay};

#[derive(Clone, Debug)]
struct StoredRecord {
    aggregate_id: Uuid,
    payload: serde_json::Value,
    status: OutboxStatus,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
}

/// Status transition observed on the store, with the attempts value after it.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Transition {
    outbox_id: i64,
    status: OutboxStatus,
    attempts: i32,
}

struct MockStore {
    records: Mutex<HashMap<i64, StoredRecord>>,
    transitions: Mutex<Vec<Transition>>,
    /// When set, eligibility ignores `next_attempt_at` so retry walks do not
    /// have to wait out real backoff delays.
    ignore_backoff: bool,
    fail_finalize: AtomicBool,
}

impl MockStore {
    fn new(ignore_backoff: bool) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            transitions: Mutex::new(Vec::new()),
            ignore_backoff,
            fail_finalize: AtomicBool::new(false),
        }
    }

    async fn insert_new(&self, outbox_id: i64) {
        self.records.lock().await.insert(
            outbox_id,
            StoredRecord {
                aggregate_id: Uuid::new_v4(),
                payload: json!({ "outboxId": outbox_id }),
                status: OutboxStatus::New,
                attempts: 0,
                next_attempt_at: Utc::now(),
            },
        );
    }

    async fn status(&self, outbox_id: i64) -> Option<OutboxStatus> {
        self.records.lock().await.get(&outbox_id).map(|r| r.status)
    }

    async fn attempts(&self, outbox_id: i64) -> Option<i32> {
        self.records.lock().await.get(&outbox_id).map(|r| r.attempts)
    }

    async fn transitions(&self) -> Vec<Transition> {
        self.transitions.lock().await.clone()
    }

    async fn record_transition(&self, outbox_id: i64, status: OutboxStatus, attempts: i32) {
        self.transitions.lock().await.push(Transition {
            outbox_id,
            status,
            attempts,
        });
    }
}

#[async_trait]
impl OutboxStore for MockStore {
    async fn reserve_batch(
        &self,
        lease: Duration,
        limit: i64,
        max_attempts: i32,
    ) -> anyhow::Result<Vec<OutboxEvent>> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(30));
        let mut records = self.records.lock().await;

        let mut eligible: Vec<i64> = records
            .iter()
            .filter(|(_, r)| {
                matches!(r.status, OutboxStatus::New | OutboxStatus::Failed)
                    && r.attempts < max_attempts
                    && (self.ignore_backoff || r.next_attempt_at <= now)
            })
            .map(|(id, _)| *id)
            .collect();
        eligible.sort_unstable();
        eligible.truncate(limit as usize);

        let mut batch = Vec::with_capacity(eligible.len());
        for id in eligible {
            let record = records.get_mut(&id).unwrap();
            record.next_attempt_at = now + lease;
            batch.push(OutboxEvent {
                id,
                aggregate_id: record.aggregate_id,
                aggregate_type: AggregateType::Event,
                event_type: OutboxEventType::EventCreated,
                payload: record.payload.clone(),
                status: record.status,
                attempts: record.attempts,
                next_attempt_at: record.next_attempt_at,
                created_at: now,
            });
        }
        Ok(batch)
    }

    async fn mark_sent_and_finalize(&self, outbox_id: i64) -> anyhow::Result<()> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            anyhow::bail!("finalisation transaction failed");
        }
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&outbox_id)
            .ok_or_else(|| anyhow::anyhow!("outbox record {outbox_id} not found"))?;
        record.status = OutboxStatus::Sent;
        let attempts = record.attempts;
        drop(records);
        self.record_transition(outbox_id, OutboxStatus::Sent, attempts).await;
        Ok(())
    }

    async fn mark_failed_with_backoff(
        &self,
        outbox_id: i64,
        next_attempt_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&outbox_id) {
            record.status = OutboxStatus::Failed;
            record.attempts += 1;
            record.next_attempt_at = next_attempt_at;
            let attempts = record.attempts;
            drop(records);
            self.record_transition(outbox_id, OutboxStatus::Failed, attempts).await;
        }
        Ok(())
    }

    async fn mark_gave_up(&self, outbox_id: i64) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&outbox_id) {
            record.status = OutboxStatus::GaveUp;
            record.attempts += 1;
            record.next_attempt_at = Utc::now();
            let attempts = record.attempts;
            drop(records);
            self.record_transition(outbox_id, OutboxStatus::GaveUp, attempts).await;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
enum ProduceOutcome {
    Success,
    Permanent,
    Exhausted,
    Canceled,
}

struct ScriptedProducer {
    script: Mutex<VecDeque<ProduceOutcome>>,
    fallback: ProduceOutcome,
    delay: Duration,
    calls: Mutex<Vec<i64>>,
    in_flight: Mutex<HashSet<i64>>,
    overlap_detected: AtomicBool,
}

impl ScriptedProducer {
    fn always(fallback: ProduceOutcome) -> Self {
        Self::scripted(Vec::new(), fallback)
    }

    fn scripted(script: Vec<ProduceOutcome>, fallback: ProduceOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
            overlap_detected: AtomicBool::new(false),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn calls(&self) -> Vec<i64> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Producer for ScriptedProducer {
    async fn produce(
        &self,
        _cancel: &CancellationToken,
        outbox_id: i64,
        _payload: &[u8],
    ) -> Result<(), ProduceError> {
        if !self.in_flight.lock().await.insert(outbox_id) {
            self.overlap_detected.store(true, Ordering::SeqCst);
        }
        self.calls.lock().await.push(outbox_id);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(self.fallback);

        self.in_flight.lock().await.remove(&outbox_id);

        match outcome {
            ProduceOutcome::Success => Ok(()),
            ProduceOutcome::Permanent => Err(ProduceError::Permanent(anyhow::anyhow!(
                "topic authorization failed"
            ))),
            ProduceOutcome::Exhausted => Err(ProduceError::Exhausted {
                attempts: 3,
                source: anyhow::anyhow!("leader not available"),
            }),
            ProduceOutcome::Canceled => Err(ProduceError::Canceled),
        }
    }
}

fn relay_config(workers: usize, max_attempts: i32) -> RelayConfig {
    RelayConfig {
        workers,
        batch_size: 10,
        lease: Duration::from_secs(30),
        poll_period: Duration::from_millis(10),
        max_attempts,
    }
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn run_relay(
    store: Arc<MockStore>,
    producer: Arc<ScriptedProducer>,
    config: RelayConfig,
) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let relay = Arc::new(Relay::new(store, producer, config));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(relay.run(cancel.clone()));
    (cancel, handle)
}

#[tokio::test]
async fn happy_path_marks_record_sent() {
    let store = Arc::new(MockStore::new(false));
    store.insert_new(1).await;
    let producer = Arc::new(ScriptedProducer::always(ProduceOutcome::Success));

    let (cancel, handle) = run_relay(store.clone(), producer.clone(), relay_config(2, 5)).await;
    wait_for(|| {
        let store = store.clone();
        async move { store.status(1).await == Some(OutboxStatus::Sent) }
    })
    .await;
    cancel.cancel();
    handle.await.unwrap();

    // attempts reflects the tries it succeeded on: none failed.
    assert_eq!(store.attempts(1).await, Some(0));
    assert_eq!(producer.calls().await, vec![1]);
}

#[tokio::test]
async fn permanent_failure_gives_up_without_retry() {
    let store = Arc::new(MockStore::new(true));
    store.insert_new(1).await;
    let producer = Arc::new(ScriptedProducer::always(ProduceOutcome::Permanent));

    let (cancel, handle) = run_relay(store.clone(), producer.clone(), relay_config(1, 5)).await;
    wait_for(|| {
        let store = store.clone();
        async move { store.status(1).await == Some(OutboxStatus::GaveUp) }
    })
    .await;

    // Several more poll cycles must not re-reserve a terminal record.
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(store.attempts(1).await, Some(1));
    assert_eq!(producer.calls().await, vec![1]);
}

#[tokio::test]
async fn retryable_exhaustion_walks_failed_to_gave_up() {
    let store = Arc::new(MockStore::new(true));
    store.insert_new(7).await;
    let producer = Arc::new(ScriptedProducer::always(ProduceOutcome::Exhausted));

    let (cancel, handle) = run_relay(store.clone(), producer.clone(), relay_config(1, 3)).await;
    wait_for(|| {
        let store = store.clone();
        async move { store.status(7).await == Some(OutboxStatus::GaveUp) }
    })
    .await;
    cancel.cancel();
    handle.await.unwrap();

    let transitions = store.transitions().await;
    assert_eq!(
        transitions,
        vec![
            Transition { outbox_id: 7, status: OutboxStatus::Failed, attempts: 1 },
            Transition { outbox_id: 7, status: OutboxStatus::Failed, attempts: 2 },
            Transition { outbox_id: 7, status: OutboxStatus::GaveUp, attempts: 3 },
        ]
    );
    assert_eq!(producer.calls().await.len(), 3);
}

#[tokio::test]
async fn failed_record_backoff_is_in_the_future() {
    let store = Arc::new(MockStore::new(false));
    store.insert_new(3).await;
    let producer = Arc::new(ScriptedProducer::scripted(
        vec![ProduceOutcome::Exhausted],
        ProduceOutcome::Success,
    ));

    let (cancel, handle) = run_relay(store.clone(), producer.clone(), relay_config(1, 5)).await;
    wait_for(|| {
        let store = store.clone();
        async move { store.status(3).await == Some(OutboxStatus::Failed) }
    })
    .await;
    cancel.cancel();
    handle.await.unwrap();

    let records = store.records.lock().await;
    let record = records.get(&3).unwrap();
    assert_eq!(record.attempts, 1);
    assert!(record.next_attempt_at > Utc::now(), "backoff must defer the retry");
}

#[tokio::test]
async fn finalize_failure_retires_record_without_resend() {
    let store = Arc::new(MockStore::new(true));
    store.insert_new(1).await;
    store.fail_finalize.store(true, Ordering::SeqCst);
    let producer = Arc::new(ScriptedProducer::always(ProduceOutcome::Success));

    let (cancel, handle) = run_relay(store.clone(), producer.clone(), relay_config(1, 5)).await;
    wait_for(|| {
        let store = store.clone();
        async move { store.status(1).await == Some(OutboxStatus::GaveUp) }
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    handle.await.unwrap();

    // The message already reached the broker; it must not be produced again.
    assert_eq!(producer.calls().await, vec![1]);
}

#[tokio::test]
async fn cancellation_leaves_record_for_re_reservation() {
    let store = Arc::new(MockStore::new(false));
    store.insert_new(1).await;
    let producer = Arc::new(ScriptedProducer::always(ProduceOutcome::Canceled));

    let (cancel, handle) = run_relay(store.clone(), producer.clone(), relay_config(1, 5)).await;
    wait_for(|| {
        let producer = producer.clone();
        async move { !producer.calls().await.is_empty() }
    })
    .await;
    cancel.cancel();
    handle.await.unwrap();

    // No status transition happened; only the lease was pushed out.
    assert_eq!(store.status(1).await, Some(OutboxStatus::New));
    assert_eq!(store.attempts(1).await, Some(0));
    assert!(store.transitions().await.is_empty());
}

#[tokio::test]
async fn workers_never_process_the_same_record_concurrently() {
    let store = Arc::new(MockStore::new(false));
    for id in 1..=20 {
        store.insert_new(id).await;
    }
    let producer = Arc::new(
        ScriptedProducer::always(ProduceOutcome::Success).with_delay(Duration::from_millis(5)),
    );

    let (cancel, handle) = run_relay(store.clone(), producer.clone(), relay_config(4, 5)).await;
    wait_for(|| {
        let store = store.clone();
        async move {
            let records = store.records.lock().await;
            records.values().all(|r| r.status == OutboxStatus::Sent)
        }
    })
    .await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(!producer.overlap_detected.load(Ordering::SeqCst));

    let mut calls = producer.calls().await;
    calls.sort_unstable();
    calls.dedup();
    assert_eq!(calls.len(), 20, "every record produced exactly once");
}

#[tokio::test]
async fn single_worker_preserves_fifo_order() {
    let store = Arc::new(MockStore::new(false));
    for id in [5, 1, 9, 3, 7] {
        store.insert_new(id).await;
    }
    let producer = Arc::new(ScriptedProducer::always(ProduceOutcome::Success));

    let (cancel, handle) = run_relay(store.clone(), producer.clone(), relay_config(1, 5)).await;
    wait_for(|| {
        let store = store.clone();
        async move {
            let records = store.records.lock().await;
            records.values().all(|r| r.status == OutboxStatus::Sent)
        }
    })
    .await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(producer.calls().await, vec![1, 3, 5, 7, 9]);
}
