//! Core row type shared by both pipeline loops.

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::productstream::serialization::SerializationError;

/// A single row of the source `products` table.
///
/// Immutable once read from the source. `price` stays a `Decimal` inside the
/// pipeline and is converted to `f64` exactly once, at the Avro wire boundary
/// (the wire contract types it as a `double`).
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: Decimal,
    pub updated_at: NaiveDateTime,
}

impl ProductRecord {
    /// `updated_at` as epoch milliseconds, the representation used by the
    /// Avro `timestamp-millis` logical type.
    pub fn updated_at_millis(&self) -> i64 {
        self.updated_at.and_utc().timestamp_millis()
    }

    /// `updated_at` as an ISO-8601 UTC string with millisecond precision,
    /// the representation the warehouse JSON loader expects.
    pub fn updated_at_iso8601(&self) -> String {
        self.updated_at
            .and_utc()
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string()
    }

    /// `price` at the wire unit (double). Fails for values outside the f64
    /// range, which is a per-record skippable condition for the publisher.
    pub fn price_f64(&self) -> Result<f64, SerializationError> {
        self.price.to_f64().ok_or_else(|| {
            SerializationError::field_conversion("price", "value not representable as f64")
        })
    }

    /// Rebuild a record from its wire-level parts (consumer side).
    pub fn from_wire_parts(
        id: String,
        name: String,
        category: String,
        price: f64,
        updated_at_millis: i64,
    ) -> Result<Self, SerializationError> {
        let price = Decimal::from_f64(price).ok_or_else(|| {
            SerializationError::field_conversion("price", "non-finite double on the wire")
        })?;
        let updated_at = DateTime::from_timestamp_millis(updated_at_millis)
            .ok_or_else(|| {
                SerializationError::field_conversion(
                    "updated_timestamp",
                    "millis out of chrono range",
                )
            })?
            .naive_utc();
        Ok(Self {
            id,
            name,
            category,
            price,
            updated_at,
        })
    }

    /// The JSON object staged for the warehouse bulk load. Column names match
    /// the sink table case-insensitively, timestamps are ISO-8601 strings.
    pub fn stage_json(&self) -> Value {
        json!({
            "product_id": self.id,
            "name": self.name,
            "category": self.category,
            "price": self.price.to_f64().unwrap_or(f64::NAN),
            "updated_timestamp": self.updated_at_iso8601(),
        })
    }
}

/// Serialize a batch as line-delimited JSON, one object per record, trailing
/// newline included. This is the transfer format staged for the bulk load.
pub fn to_jsonl(records: &[ProductRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * 128);
    for record in records {
        // stage_json never produces non-serializable values
        if let Ok(line) = serde_json::to_vec(&record.stage_json()) {
            out.extend_from_slice(&line);
            out.push(b'\n');
        }
    }
    out
}
