use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::KafkaConfig;
use crate::kafka::config::{create_client_config, Role};
use crate::metrics;

/// Observation-only consumer group.
///
/// Logs and counts every message seen on the reader topic; carries no
/// business logic.
pub struct ObservationConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl ObservationConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = create_client_config(config, Role::Reader)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[&config.reader_topic])?;
        info!(topic = %config.reader_topic, group = %config.consumer_group, "kafka consumer created");

        Ok(Self {
            consumer,
            topic: config.reader_topic.clone(),
        })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(topic = %self.topic, "consumer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("closing consumer group");
                    return;
                }
                result = self.consumer.recv() => match result {
                    Ok(message) => {
                        metrics::KAFKA_CONSUMER_MESSAGES_TOTAL
                            .with_label_values(&[message.topic()])
                            .inc();
                        let payload = message
                            .payload()
                            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                            .unwrap_or_default();
                        info!(
                            topic = %message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            %payload,
                            "message observed"
                        );
                    }
                    Err(err) => {
                        error!(error = %err, "kafka consumer error");
                    }
                }
            }
        }
    }
}
