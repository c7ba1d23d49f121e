use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::KafkaConfig;
use crate::kafka::config::{create_client_config, Role};
use crate::metrics;
use crate::relay::{ProduceError, Producer};
use crate::utils::{next_backoff_with_jitter, sleep_with_cancel};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Synchronous-acknowledgement producer for outbox payloads.
///
/// `acks=all` so a successful return means every in-sync replica has the
/// message. librdkafka's internal retries are disabled: the retry loop in
/// [`EventProducer::produce_message`] is the only retry authority, which
/// keeps the attempt accounting honest.
pub struct EventProducer {
    producer: FutureProducer,
    topic: String,
    max_attempts: u32,
}

impl EventProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = create_client_config(config, Role::Writer)
            .set("acks", "all")
            .set("message.send.max.retries", "0")
            .set("request.timeout.ms", "10000")
            .set("message.timeout.ms", "15000")
            .set("socket.keepalive.enable", "true")
            .create()?;

        info!(topic = %config.writer_topic, "kafka producer created");

        Ok(Self {
            producer,
            topic: config.writer_topic.clone(),
            max_attempts: config.max_attempts.max(1),
        })
    }

    /// One send to the broker. The key is the decimal outbox id, so retries
    /// of the same record hash to the same partition.
    async fn send_once(&self, outbox_id: i64, payload: &[u8]) -> Result<(i32, i64), KafkaError> {
        let key = outbox_id.to_string();
        let record = FutureRecord::to(&self.topic)
            .key(&key)
            .payload(payload)
            .timestamp(Utc::now().timestamp_millis());

        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok((partition, offset)) => Ok((partition, offset)),
            Err((err, _)) => Err(err),
        }
    }

    /// Sends with per-call retries up to `max_attempts`.
    ///
    /// Permanent broker errors return immediately; retryable errors sleep a
    /// jittered backoff between attempts, honouring cancellation.
    pub async fn produce_message(
        &self,
        cancel: &CancellationToken,
        outbox_id: i64,
        payload: &[u8],
    ) -> Result<(), ProduceError> {
        let mut last_err: Option<KafkaError> = None;

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                metrics::KAFKA_PRODUCER_OPERATIONS_TOTAL
                    .with_label_values(&[&self.topic, "canceled"])
                    .inc();
                return Err(ProduceError::Canceled);
            }

            let started = Instant::now();
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    metrics::KAFKA_PRODUCER_OPERATIONS_TOTAL
                        .with_label_values(&[&self.topic, "canceled"])
                        .inc();
                    return Err(ProduceError::Canceled);
                }
                result = self.send_once(outbox_id, payload) => result,
            };
            let elapsed = started.elapsed();

            let outcome = if result.is_ok() { "ok" } else { "error" };
            metrics::KAFKA_PRODUCER_ATTEMPT_LATENCY
                .with_label_values(&[&self.topic, outcome])
                .observe(elapsed.as_secs_f64());

            match result {
                Ok((partition, offset)) => {
                    metrics::KAFKA_PRODUCER_OPERATIONS_TOTAL
                        .with_label_values(&[&self.topic, "success"])
                        .inc();
                    metrics::KAFKA_PRODUCER_SUCCESS_ATTEMPTS
                        .with_label_values(&[&self.topic])
                        .observe(attempt as f64);
                    info!(
                        outbox_id,
                        topic = %self.topic,
                        partition,
                        offset,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "message sent"
                    );
                    return Ok(());
                }
                Err(err) if is_permanent(&err) => {
                    metrics::KAFKA_PRODUCER_OPERATIONS_TOTAL
                        .with_label_values(&[&self.topic, "permanent"])
                        .inc();
                    error!(outbox_id, attempt, error = %err, "permanent kafka error");
                    return Err(ProduceError::Permanent(anyhow::Error::new(err)));
                }
                Err(err) => {
                    warn!(
                        outbox_id,
                        attempt,
                        error = %err,
                        class = classify_retryable(&err),
                        "retryable kafka error"
                    );
                    last_err = Some(err);

                    if attempt < self.max_attempts
                        && !sleep_with_cancel(cancel, next_backoff_with_jitter(attempt - 1)).await
                    {
                        metrics::KAFKA_PRODUCER_OPERATIONS_TOTAL
                            .with_label_values(&[&self.topic, "canceled"])
                            .inc();
                        return Err(ProduceError::Canceled);
                    }
                }
            }
        }

        metrics::KAFKA_PRODUCER_OPERATIONS_TOTAL
            .with_label_values(&[&self.topic, "exhausted"])
            .inc();
        error!(
            outbox_id,
            attempts = self.max_attempts,
            "produce failed after exhausting attempts"
        );
        let source = match last_err {
            Some(err) => anyhow::Error::new(err),
            None => anyhow::anyhow!("no attempt was made"),
        };
        Err(ProduceError::Exhausted {
            attempts: self.max_attempts,
            source,
        })
    }

    /// Broker reachability probe for the health endpoint.
    ///
    /// Fetches cluster metadata with a short timeout; does not require
    /// describe-level ACLs.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let producer = self.producer.clone();
        let metadata = tokio::task::spawn_blocking(move || {
            producer.client().fetch_metadata(None, METADATA_TIMEOUT)
        })
        .await??;

        if metadata.brokers().is_empty() {
            anyhow::bail!("no kafka brokers available");
        }
        Ok(())
    }

    /// Waits for in-flight messages before shutdown.
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        self.producer.flush(Timeout::After(timeout))
    }
}

#[async_trait]
impl Producer for EventProducer {
    async fn produce(
        &self,
        cancel: &CancellationToken,
        outbox_id: i64,
        payload: &[u8],
    ) -> Result<(), ProduceError> {
        self.produce_message(cancel, outbox_id, payload).await
    }
}

/// Broker errors the caller must not retry.
fn is_permanent(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::ClusterAuthorizationFailed
                | RDKafkaErrorCode::InvalidRequest
                | RDKafkaErrorCode::InvalidMessage
                | RDKafkaErrorCode::MessageSizeTooLarge
                | RDKafkaErrorCode::SaslAuthenticationFailed
        )
    )
}

fn classify_retryable(err: &KafkaError) -> &'static str {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::LeaderNotAvailable) => "leader_not_available",
        Some(RDKafkaErrorCode::RequestTimedOut) => "broker_timeout",
        Some(
            RDKafkaErrorCode::NotEnoughReplicas | RDKafkaErrorCode::NotEnoughReplicasAfterAppend,
        ) => "not_enough_replicas",
        Some(RDKafkaErrorCode::OperationTimedOut) => "client_timeout",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kafka_error(code: RDKafkaErrorCode) -> KafkaError {
        KafkaError::MessageProduction(code)
    }

    #[test]
    fn authorization_and_request_shape_errors_are_permanent() {
        for code in [
            RDKafkaErrorCode::TopicAuthorizationFailed,
            RDKafkaErrorCode::ClusterAuthorizationFailed,
            RDKafkaErrorCode::InvalidRequest,
            RDKafkaErrorCode::InvalidMessage,
            RDKafkaErrorCode::MessageSizeTooLarge,
            RDKafkaErrorCode::SaslAuthenticationFailed,
        ] {
            assert!(is_permanent(&kafka_error(code)), "{code:?} should be permanent");
        }
    }

    #[test]
    fn availability_errors_are_retryable() {
        for code in [
            RDKafkaErrorCode::LeaderNotAvailable,
            RDKafkaErrorCode::RequestTimedOut,
            RDKafkaErrorCode::NotEnoughReplicas,
            RDKafkaErrorCode::NotEnoughReplicasAfterAppend,
            RDKafkaErrorCode::BrokerTransportFailure,
        ] {
            assert!(!is_permanent(&kafka_error(code)), "{code:?} should be retryable");
        }
    }

    #[test]
    fn retryable_classification_names() {
        assert_eq!(
            classify_retryable(&kafka_error(RDKafkaErrorCode::LeaderNotAvailable)),
            "leader_not_available"
        );
        assert_eq!(
            classify_retryable(&kafka_error(RDKafkaErrorCode::RequestTimedOut)),
            "broker_timeout"
        );
        assert_eq!(
            classify_retryable(&kafka_error(RDKafkaErrorCode::NotEnoughReplicas)),
            "not_enough_replicas"
        );
    }
}
