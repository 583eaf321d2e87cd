//! # productstream
//!
//! A watermark-driven pipeline that moves changed rows from a relational
//! `products` table through Kafka (Avro-encoded, schema-registry-validated)
//! into an analytical warehouse via stage-then-bulk-load.
//!
//! Two cooperating loops, shipped as separate binaries:
//!
//! - **Producer** (`product_producer`): queries the source for rows newer than
//!   the persisted watermark, publishes them to Kafka with delivery
//!   acknowledgment, and advances the watermark only for records the broker
//!   confirmed.
//! - **Consumer** (`product_consumer`): accumulates messages into a bounded
//!   batch (size and age limits), stages the batch as line-delimited JSON,
//!   issues a bulk load, and commits consumer offsets only after the load
//!   succeeded.
//!
//! Both loops share the same durability discipline, captured by
//! [`CommitGate`]: a durability token (watermark or offset cursor) advances
//! only after the dependent downstream write is confirmed. The pipeline is
//! at-least-once end to end: duplicates are possible after a crash between
//! sink load and offset commit, loss is not.

pub mod productstream;

// Re-export the main API at crate root for easy access
pub use productstream::config::PipelineConfig;
pub use productstream::model::ProductRecord;
pub use productstream::pipeline::{
    BatchBuffer, CommitGate, ConsumerLoop, PipelineError, ProducerLoop, RetryPolicy,
    WatermarkStore,
};
pub use productstream::schema::{SchemaRegistry, SchemaRegistryClient};
pub use productstream::serialization::{AvroCodec, SerializationError};
pub use productstream::sink::{BatchLoader, WarehouseClient};
pub use productstream::source::SourceExtractor;
