use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

pub static KAFKA_PRODUCER_ATTEMPT_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "calendar_kafka_producer_attempt_latency_seconds",
        "Latency per single produce attempt.",
        &["topic", "result"]
    )
    .unwrap()
});

pub static KAFKA_PRODUCER_OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "calendar_kafka_producer_operations_total",
        "Total produce operations (one call) by result.",
        &["topic", "result"]
    )
    .unwrap()
});

pub static KAFKA_PRODUCER_SUCCESS_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "calendar_kafka_producer_success_attempts",
        "Attempt number on which a produce call succeeded.",
        &["topic"],
        vec![1.0, 2.0, 3.0, 4.0, 5.0]
    )
    .unwrap()
});

pub static KAFKA_CONSUMER_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "calendar_kafka_consumer_messages_total",
        "Total consumed Kafka messages by topic.",
        &["topic"]
    )
    .unwrap()
});

pub static RELAY_RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "calendar_relay_records_total",
        "Outbox records resolved by the relay, by outcome.",
        &["outcome"]
    )
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
