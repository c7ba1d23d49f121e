use std::time::Duration;

use anyhow::Result;

const DEFAULT_PORT: u16 = 8080;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 3;

const DEFAULT_RELAY_WORKERS: usize = 4;
const DEFAULT_RELAY_BATCH_SIZE: i64 = 100;
const DEFAULT_RELAY_LEASE_SECS: u64 = 30;
const DEFAULT_RELAY_POLL_PERIOD_MS: u64 = 1000;
const DEFAULT_RELAY_MAX_ATTEMPTS: i32 = 5;

const DEFAULT_KAFKA_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_CRON_DAYS_TO_DELETE: i32 = 365;

/// Database connection pool configuration
#[derive(Clone, Debug)]
pub struct DbConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// Kafka broker configuration
///
/// Reader and writer credentials are separate because the two sides may run
/// under different SASL accounts (the consumer account may only Read, the
/// producer account only Write).
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Comma-separated broker list (e.g. "kafka1:9092,kafka2:9092")
    pub brokers: String,
    /// Topic the observation consumer reads from
    pub reader_topic: String,
    /// Topic the outbox relay publishes to
    pub writer_topic: String,
    pub reader_username: Option<String>,
    pub reader_password: Option<String>,
    pub writer_username: Option<String>,
    pub writer_password: Option<String>,
    pub ssl_enabled: bool,
    pub consumer_group: String,
    /// Per-call produce attempts before the producer reports exhaustion
    pub max_attempts: u32,
}

/// Outbox relay configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub workers: usize,
    pub batch_size: i64,
    /// Per-record invisibility window while a worker owns the record
    pub lease: Duration,
    pub poll_period: Duration,
    /// Record-level retry budget before GAVE_UP
    pub max_attempts: i32,
}

/// Purge job configuration
///
/// `schedule` (cron expression) wins over `interval` ("@every <duration>")
/// when both are set.
#[derive(Clone, Debug)]
pub struct CronConfig {
    pub days_to_delete: i32,
    pub schedule: Option<String>,
    pub interval: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub rust_log: String,
    pub db: DbConfig,
    pub kafka: KafkaConfig,
    pub relay: RelayConfig,
    pub cron: CronConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            database_url: std::env::var("DATABASE_URL")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            db: DbConfig {
                max_connections: std::env::var("DB_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
                acquire_timeout_secs: std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS),
            },
            kafka: KafkaConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                reader_topic: std::env::var("KAFKA_READER_TOPIC")
                    .unwrap_or_else(|_| "calendar-events".to_string()),
                writer_topic: std::env::var("KAFKA_WRITER_TOPIC")
                    .unwrap_or_else(|_| "calendar-events".to_string()),
                reader_username: std::env::var("KAFKA_READER_USERNAME").ok(),
                reader_password: std::env::var("KAFKA_READER_PASSWORD").ok(),
                writer_username: std::env::var("KAFKA_WRITER_USERNAME").ok(),
                writer_password: std::env::var("KAFKA_WRITER_PASSWORD").ok(),
                ssl_enabled: std::env::var("KAFKA_SSL_ENABLED")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(false),
                consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                    .unwrap_or_else(|_| "calendar-consumer-group".to_string()),
                max_attempts: std::env::var("KAFKA_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_KAFKA_MAX_ATTEMPTS),
            },
            relay: RelayConfig {
                workers: std::env::var("RELAY_WORKERS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_RELAY_WORKERS),
                batch_size: std::env::var("RELAY_BATCH_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_RELAY_BATCH_SIZE),
                lease: Duration::from_secs(
                    std::env::var("RELAY_LEASE_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(DEFAULT_RELAY_LEASE_SECS),
                ),
                poll_period: Duration::from_millis(
                    std::env::var("RELAY_POLL_PERIOD_MS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(DEFAULT_RELAY_POLL_PERIOD_MS),
                ),
                max_attempts: std::env::var("RELAY_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_RELAY_MAX_ATTEMPTS),
            },
            cron: CronConfig {
                days_to_delete: std::env::var("CRON_DAYS_TO_DELETE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_CRON_DAYS_TO_DELETE),
                schedule: std::env::var("CRON_SCHEDULE").ok().filter(|s| !s.is_empty()),
                interval: std::env::var("CRON_INTERVAL").ok().filter(|s| !s.is_empty()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.relay.workers < 1 {
            anyhow::bail!("RELAY_WORKERS must be at least 1");
        }
        if self.relay.batch_size < 1 {
            anyhow::bail!("RELAY_BATCH_SIZE must be at least 1");
        }
        if self.relay.max_attempts < 1 {
            anyhow::bail!("RELAY_MAX_ATTEMPTS must be at least 1");
        }
        if self.kafka.max_attempts < 1 {
            anyhow::bail!("KAFKA_MAX_ATTEMPTS must be at least 1");
        }
        if self.cron.days_to_delete < 0 {
            anyhow::bail!("CRON_DAYS_TO_DELETE must not be negative");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> Config {
        Config {
            port: 8080,
            database_url: "postgres://localhost/calendar".to_string(),
            rust_log: "info".to_string(),
            db: DbConfig {
                max_connections: 5,
                acquire_timeout_secs: 3,
            },
            kafka: KafkaConfig {
                brokers: "localhost:9092".to_string(),
                reader_topic: "calendar-events".to_string(),
                writer_topic: "calendar-events".to_string(),
                reader_username: None,
                reader_password: None,
                writer_username: None,
                writer_password: None,
                ssl_enabled: false,
                consumer_group: "calendar-consumer-group".to_string(),
                max_attempts: 3,
            },
            relay: RelayConfig {
                workers: 4,
                batch_size: 100,
                lease: Duration::from_secs(30),
                poll_period: Duration::from_millis(1000),
                max_attempts: 5,
            },
            cron: CronConfig {
                days_to_delete: 365,
                schedule: None,
                interval: None,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = test_config();
        config.relay.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut config = test_config();
        config.relay.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_relay_max_attempts_rejected() {
        let mut config = test_config();
        config.relay.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
