//! Wire serialization for product records.

pub mod avro_codec;

pub use avro_codec::AvroCodec;

use thiserror::Error;

/// Errors raised at the serialization boundary. These are per-record
/// skippable conditions for both loops, never cycle-fatal.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("avro error: {message}")]
    Avro { message: String },

    #[error("field '{field}': {reason}")]
    FieldConversion { field: String, reason: String },

    #[error("malformed record: {0}")]
    Malformed(String),
}

impl SerializationError {
    pub fn avro_error(message: &str, source: apache_avro::Error) -> Self {
        SerializationError::Avro {
            message: format!("{}: {}", message, source),
        }
    }

    pub fn field_conversion(field: &str, reason: &str) -> Self {
        SerializationError::FieldConversion {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}
