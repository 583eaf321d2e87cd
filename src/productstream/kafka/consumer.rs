//! Bounded-poll Kafka consumer with manual synchronous commits.

use async_trait::async_trait;
use log::debug;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as KafkaMessage;
use rdkafka::ClientConfig;
use std::time::Duration;

use crate::productstream::kafka::error::{is_fatal_auth, ConsumeError};

/// A polled message before deserialization.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

/// The broker operations the consumer loop consumes.
#[async_trait]
pub trait MessageStream: Send {
    /// Bounded poll: `Ok(None)` on timeout or other non-message signals
    /// (partition end-of-stream is informational, not an error).
    async fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>, ConsumeError>;

    /// Synchronously commit the consumer position covering every message
    /// returned by `poll` so far. Called only after a successful sink load.
    fn commit_sync(&mut self) -> Result<(), ConsumeError>;
}

/// rdkafka-backed consumer for the product topic.
///
/// Auto-commit is disabled; the consumer loop owns the offset cursor and
/// commits it through the commit gate after each successful bulk load.
pub struct KafkaBatchConsumer {
    consumer: StreamConsumer,
}

impl KafkaBatchConsumer {
    pub fn new(
        mut client_config: ClientConfig,
        group_id: &str,
        topic: &str,
    ) -> Result<Self, KafkaError> {
        client_config
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("isolation.level", "read_committed")
            .set("enable.auto.commit", "false");

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;
        Ok(KafkaBatchConsumer { consumer })
    }
}

#[async_trait]
impl MessageStream for KafkaBatchConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>, ConsumeError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(KafkaError::PartitionEOF(partition))) => {
                debug!("reached end of partition {}", partition);
                Ok(None)
            }
            Ok(Err(err)) if is_fatal_auth(&err) => {
                Err(ConsumeError::Authentication(err.to_string()))
            }
            Ok(Err(err)) => Err(ConsumeError::Broker(err.to_string())),
            Ok(Ok(message)) => Ok(Some(RawMessage {
                key: message.key().map(|k| k.to_vec()),
                payload: message.payload().map(|p| p.to_vec()),
                partition: message.partition(),
                offset: message.offset(),
            })),
        }
    }

    fn commit_sync(&mut self) -> Result<(), ConsumeError> {
        self.consumer
            .commit_consumer_state(CommitMode::Sync)
            .map_err(|err| {
                if is_fatal_auth(&err) {
                    ConsumeError::Authentication(err.to_string())
                } else {
                    ConsumeError::Broker(err.to_string())
                }
            })
    }
}
