//! Avro codec for the product wire contract.
//!
//! Messages are raw Avro datums (no Object Container File framing), matching
//! what schema-registry-aware Kafka clients put on the wire. The schema is
//! fixed: this pipeline carries exactly one record shape.

use apache_avro::{types::Value as AvroValue, Schema as AvroSchema};

use crate::productstream::model::ProductRecord;
use crate::productstream::serialization::SerializationError;

/// The wire contract. Preserved bit-for-bit: field names, order, and the
/// `timestamp-millis` logical type all match the registered subject.
pub const PRODUCT_AVRO_SCHEMA: &str = r#"
{
  "type": "record",
  "name": "Product",
  "namespace": "com.buyonline.products",
  "fields": [
    {"name": "product_id", "type": "string"},
    {"name": "name", "type": "string"},
    {"name": "category", "type": "string"},
    {"name": "price", "type": "double"},
    {"name": "updated_timestamp", "type": {"type": "long", "logicalType": "timestamp-millis"}}
  ]
}
"#;

/// Avro codec for serializing/deserializing [`ProductRecord`] against the
/// product schema.
pub struct AvroCodec {
    schema: AvroSchema,
}

impl AvroCodec {
    /// Create a codec over the built-in product schema.
    pub fn new() -> Result<Self, SerializationError> {
        Self::with_schema_str(PRODUCT_AVRO_SCHEMA)
    }

    /// Create a codec over an explicit schema JSON (must be structurally
    /// compatible with the product record).
    pub fn with_schema_str(schema_json: &str) -> Result<Self, SerializationError> {
        let schema = AvroSchema::parse_str(schema_json)
            .map_err(|e| SerializationError::avro_error("failed to parse Avro schema", e))?;
        Ok(AvroCodec { schema })
    }

    pub fn schema(&self) -> &AvroSchema {
        &self.schema
    }

    /// Serialize a record to a raw Avro datum.
    pub fn serialize(&self, record: &ProductRecord) -> Result<Vec<u8>, SerializationError> {
        let value = AvroValue::Record(vec![
            (
                "product_id".to_string(),
                AvroValue::String(record.id.clone()),
            ),
            ("name".to_string(), AvroValue::String(record.name.clone())),
            (
                "category".to_string(),
                AvroValue::String(record.category.clone()),
            ),
            ("price".to_string(), AvroValue::Double(record.price_f64()?)),
            (
                "updated_timestamp".to_string(),
                AvroValue::TimestampMillis(record.updated_at_millis()),
            ),
        ]);

        apache_avro::to_avro_datum(&self.schema, value)
            .map_err(|e| SerializationError::avro_error("failed to encode Avro datum", e))
    }

    /// Deserialize a raw Avro datum back into a record.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<ProductRecord, SerializationError> {
        let value = apache_avro::from_avro_datum(&self.schema, &mut &bytes[..], None)
            .map_err(|e| SerializationError::avro_error("failed to decode Avro datum", e))?;

        let fields = match value {
            AvroValue::Record(fields) => fields,
            other => {
                return Err(SerializationError::Malformed(format!(
                    "expected record, got {:?}",
                    other
                )))
            }
        };

        let mut id = None;
        let mut name = None;
        let mut category = None;
        let mut price = None;
        let mut updated_millis = None;

        for (field_name, field_value) in fields {
            match (field_name.as_str(), field_value) {
                ("product_id", AvroValue::String(s)) => id = Some(s),
                ("name", AvroValue::String(s)) => name = Some(s),
                ("category", AvroValue::String(s)) => category = Some(s),
                ("price", AvroValue::Double(d)) => price = Some(d),
                ("updated_timestamp", AvroValue::TimestampMillis(ms)) => {
                    updated_millis = Some(ms)
                }
                // Accept a plain long if the writer schema dropped the logical type
                ("updated_timestamp", AvroValue::Long(ms)) => updated_millis = Some(ms),
                (other_name, other_value) => {
                    return Err(SerializationError::Malformed(format!(
                        "unexpected field '{}' with value {:?}",
                        other_name, other_value
                    )))
                }
            }
        }

        ProductRecord::from_wire_parts(
            id.ok_or_else(|| SerializationError::Malformed("missing product_id".into()))?,
            name.ok_or_else(|| SerializationError::Malformed("missing name".into()))?,
            category.ok_or_else(|| SerializationError::Malformed("missing category".into()))?,
            price.ok_or_else(|| SerializationError::Malformed("missing price".into()))?,
            updated_millis
                .ok_or_else(|| SerializationError::Malformed("missing updated_timestamp".into()))?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn sample() -> ProductRecord {
        ProductRecord {
            id: "prod-42".to_string(),
            name: "stand mixer".to_string(),
            category: "kitchen".to_string(),
            price: Decimal::new(24999, 2),
            updated_at: NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_milli_opt(8, 30, 0, 250)
                .unwrap(),
        }
    }

    #[test]
    fn round_trips_a_record() {
        let codec = AvroCodec::new().unwrap();
        let record = sample();
        let bytes = codec.serialize(&record).unwrap();
        let decoded = codec.deserialize(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn timestamp_survives_as_millis() {
        let codec = AvroCodec::new().unwrap();
        let record = sample();
        let decoded = codec.deserialize(&codec.serialize(&record).unwrap()).unwrap();
        assert_eq!(decoded.updated_at_millis(), record.updated_at_millis());
    }

    #[test]
    fn truncated_datum_is_an_error() {
        let codec = AvroCodec::new().unwrap();
        let bytes = codec.serialize(&sample()).unwrap();
        assert!(codec.deserialize(&bytes[..bytes.len() / 2]).is_err());
    }
}
