use rdkafka::config::ClientConfig;
use tracing::info;

use crate::config::KafkaConfig;

/// Which credential pair a client authenticates with. The consumer account
/// may only hold Read rights and the producer account only Write, so the
/// two sides never share credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Reader,
    Writer,
}

/// Builds an `rdkafka` client configuration shared by producer and consumer.
///
/// Handles bootstrap servers, optional SSL, and SASL PLAIN when the role's
/// credentials are present.
pub fn create_client_config(config: &KafkaConfig, role: Role) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.brokers);
    client_config.set("security.protocol", "plaintext");

    if config.ssl_enabled {
        info!("enabling SSL/TLS for kafka connection");
        client_config.set("security.protocol", "ssl");
    }

    let credentials = match role {
        Role::Reader => (&config.reader_username, &config.reader_password),
        Role::Writer => (&config.writer_username, &config.writer_password),
    };

    if let (Some(username), Some(password)) = credentials {
        info!(?role, "configuring SASL PLAIN authentication");
        client_config
            .set("sasl.mechanism", "PLAIN")
            .set("sasl.username", username)
            .set("sasl.password", password);

        if config.ssl_enabled {
            client_config.set("security.protocol", "sasl_ssl");
        } else {
            client_config.set("security.protocol", "sasl_plaintext");
        }
    }

    client_config
}
