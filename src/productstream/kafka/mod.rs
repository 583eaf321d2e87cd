//! Kafka client wrappers for the two pipeline loops.

pub mod consumer;
pub mod error;
pub mod publisher;

pub use consumer::{KafkaBatchConsumer, MessageStream, RawMessage};
pub use error::{is_fatal_auth, ConsumeError, PublishError};
pub use publisher::{DrainReport, KafkaPublisher, MessagePublisher};

use rdkafka::ClientConfig;

/// Base client configuration shared by producer and consumer. SASL_SSL with
/// the PLAIN mechanism is enabled only when credentials are configured;
/// otherwise the client connects in plaintext (local development).
pub fn base_client_config(brokers: &str, auth: Option<(&str, &str)>) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", brokers);
    if let Some((username, password)) = auth {
        config
            .set("security.protocol", "SASL_SSL")
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }
    config
}
