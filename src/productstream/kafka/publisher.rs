//! Kafka publisher with delivery tracking.
//!
//! Every enqueued record keeps its delivery future and event time; the
//! end-of-cycle drain resolves them and reports the max event time among
//! acknowledged records, which is the only value the watermark may advance
//! to. Records still unresolved when the drain deadline passes are counted
//! as unacked and excluded from that max.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use log::{debug, warn};
use rdkafka::error::KafkaError;
use rdkafka::producer::future_producer::OwnedDeliveryResult;
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use std::time::{Duration, Instant};

use crate::productstream::kafka::error::{is_fatal_auth, PublishError};
use crate::productstream::pipeline::RetryPolicy;

/// Outcome of draining a cycle's in-flight deliveries.
///
/// Deliveries resolve in send order, which is ascending event time, so
/// `acked_max` is the event time of the last record in the fully-confirmed
/// prefix: once one delivery fails or times out, later acks still count but
/// no longer raise `acked_max`. Advancing the watermark to `acked_max` can
/// therefore never skip an unconfirmed record.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainReport {
    pub acked: usize,
    pub failed: usize,
    pub unacked: usize,
    /// Max event time of the confirmed prefix this cycle.
    pub acked_max: Option<NaiveDateTime>,
    blocked: bool,
}

impl DrainReport {
    pub fn record_ack(&mut self, event_time: NaiveDateTime) {
        self.acked += 1;
        if !self.blocked {
            self.acked_max = Some(match self.acked_max {
                Some(current) if current >= event_time => current,
                _ => event_time,
            });
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.blocked = true;
    }

    pub fn record_unacked(&mut self) {
        self.unacked += 1;
        self.blocked = true;
    }
}

/// The publisher operations the producer loop consumes.
#[async_trait]
pub trait MessagePublisher: Send {
    /// Non-blocking enqueue. Queue-full backpressure is handled inside with
    /// a bounded drain-and-retry; a persistent full queue surfaces as
    /// [`PublishError::QueueFull`].
    async fn send(
        &mut self,
        key: &str,
        event_time: NaiveDateTime,
        payload: Vec<u8>,
    ) -> Result<(), PublishError>;

    /// Blocking drain with a deadline: resolve all outstanding delivery
    /// confirmations and return the cycle's accumulated report.
    async fn drain(&mut self, timeout: Duration) -> Result<DrainReport, PublishError>;
}

struct InFlight {
    event_time: NaiveDateTime,
    future: DeliveryFuture,
}

/// rdkafka-backed publisher for the product topic.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    retry: RetryPolicy,
    in_flight: Vec<InFlight>,
    cycle: DrainReport,
}

impl KafkaPublisher {
    pub fn new(
        client_config: ClientConfig,
        topic: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, KafkaError> {
        let producer: FutureProducer = client_config.create()?;
        Ok(KafkaPublisher {
            producer,
            topic: topic.into(),
            retry,
            in_flight: Vec::new(),
            cycle: DrainReport::default(),
        })
    }

    /// Resolve outstanding delivery futures, merging outcomes into the
    /// cycle report. Futures unresolved at the deadline count as unacked;
    /// a canceled confirmation channel (producer dropped mid-flight) counts
    /// as a failure, the record is unconfirmed either way.
    async fn drain_in_flight(&mut self, timeout: Duration) -> Result<(), PublishError> {
        let deadline = Instant::now() + timeout;
        for pending in std::mem::take(&mut self.in_flight) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, pending.future).await {
                Err(_elapsed) => {
                    self.cycle.record_unacked();
                }
                Ok(Err(_canceled)) => {
                    warn!("delivery confirmation channel closed before resolving");
                    self.cycle.record_failure();
                }
                Ok(Ok(result)) => self.settle(pending.event_time, result)?,
            }
        }
        Ok(())
    }

    /// Merge one resolved delivery into the cycle report.
    fn settle(
        &mut self,
        event_time: NaiveDateTime,
        result: OwnedDeliveryResult,
    ) -> Result<(), PublishError> {
        match result {
            Ok(delivery) => {
                debug!(
                    "delivered to partition {} at offset {}",
                    delivery.partition, delivery.offset
                );
                self.cycle.record_ack(event_time);
                Ok(())
            }
            Err((err, _owned)) => {
                if is_fatal_auth(&err) {
                    return Err(PublishError::Authentication(err.to_string()));
                }
                warn!("delivery failed: {}", err);
                self.cycle.record_failure();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn send(
        &mut self,
        key: &str,
        event_time: NaiveDateTime,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        let mut attempt = 0u32;
        loop {
            let record = FutureRecord::to(&self.topic).key(key).payload(&payload);
            match self.producer.send_result(record) {
                Ok(future) => {
                    self.in_flight.push(InFlight { event_time, future });
                    return Ok(());
                }
                Err((err, _record)) => {
                    if is_fatal_auth(&err) {
                        return Err(PublishError::Authentication(err.to_string()));
                    }
                    let queue_full =
                        err.rdkafka_error_code() == Some(RDKafkaErrorCode::QueueFull);
                    if queue_full && self.retry.allows_retry(attempt) {
                        warn!(
                            "producer queue full for key '{}', draining before retry",
                            key
                        );
                        self.drain_in_flight(Duration::from_secs(10)).await?;
                        self.retry.pause().await;
                        attempt += 1;
                        continue;
                    }
                    return Err(if queue_full {
                        PublishError::QueueFull
                    } else {
                        PublishError::Broker(err.to_string())
                    });
                }
            }
        }
    }

    async fn drain(&mut self, timeout: Duration) -> Result<DrainReport, PublishError> {
        self.drain_in_flight(timeout).await?;
        let report = std::mem::take(&mut self.cycle);
        if report.unacked > 0 {
            warn!(
                "{} messages still unacknowledged after drain timeout",
                report.unacked
            );
        }
        Ok(report)
    }
}
