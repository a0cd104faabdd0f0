//! The document envelope and its schema-bound codec.

use crate::decoder::decode_record;
use crate::encoder::encode_record;
use crate::error::{CodecError, CodecResult};
use crate::schema::RecordSchema;
use crate::value::{Datum, Record};
use bytes::Bytes;
use std::sync::Arc;

/// Field name of the document identifier.
pub const FIELD_ID: &str = "id";
/// Field name of the JSON-serialized document.
pub const FIELD_SOURCE_DATA: &str = "source_data";
/// Field name of the ISO-8601 timestamp.
pub const FIELD_TIMESTAMP: &str = "timestamp";

/// The wire record built for every forwarded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEnvelope {
    /// Stringified document identifier.
    pub id: String,
    /// The original document serialized as JSON.
    pub source_data: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
}

impl DocumentEnvelope {
    /// Creates an envelope.
    pub fn new(
        id: impl Into<String>,
        source_data: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_data: source_data.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Converts the envelope into a generic record.
    pub fn to_record(&self) -> Record {
        Record::new()
            .with(FIELD_ID, self.id.as_str())
            .with(FIELD_SOURCE_DATA, self.source_data.as_str())
            .with(FIELD_TIMESTAMP, self.timestamp.as_str())
    }

    /// Builds an envelope from a generic record.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingField`] or [`CodecError::TypeMismatch`]
    /// if a field is absent or not a string.
    pub fn from_record(record: &Record) -> CodecResult<Self> {
        Ok(Self {
            id: string_field(record, FIELD_ID)?,
            source_data: string_field(record, FIELD_SOURCE_DATA)?,
            timestamp: string_field(record, FIELD_TIMESTAMP)?,
        })
    }
}

fn string_field(record: &Record, name: &str) -> CodecResult<String> {
    match record.get(name) {
        Some(Datum::String(s)) => Ok(s.clone()),
        Some(other) => Err(CodecError::TypeMismatch {
            field: name.to_string(),
            expected: "string",
            found: other.type_name(),
        }),
        None => Err(CodecError::MissingField {
            field: name.to_string(),
        }),
    }
}

/// Encodes and decodes [`DocumentEnvelope`]s against a fixed schema.
///
/// The codec holds only an immutable schema, so one instance can be
/// cloned into every stream and used concurrently without locking.
///
/// # Example
///
/// ```
/// use feedrelay_codec::{DocumentEnvelope, SchemaCodec};
///
/// let codec = SchemaCodec::builtin().unwrap();
/// let envelope = DocumentEnvelope::new("abc123", r#"{"_id":"abc123"}"#, "2024-01-01T00:00:00.000Z");
/// let bytes = codec.encode(&envelope).unwrap();
/// assert_eq!(codec.decode(&bytes).unwrap(), envelope);
/// ```
#[derive(Debug, Clone)]
pub struct SchemaCodec {
    schema: Arc<RecordSchema>,
}

impl SchemaCodec {
    /// Creates a codec for the given schema.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidSchema`] unless the schema has exactly
    /// the envelope layout: `id`, `source_data`, `timestamp`, all strings,
    /// in that order.
    pub fn new(schema: RecordSchema) -> CodecResult<Self> {
        let builtin = RecordSchema::document_message()?;
        if !schema.same_layout(&builtin) {
            let names: Vec<String> = schema
                .fields()
                .iter()
                .map(|f| format!("{}:{}", f.name, f.field_type))
                .collect();
            return Err(CodecError::invalid_schema(format!(
                "schema '{}' does not match the envelope layout (found [{}])",
                schema.full_name(),
                names.join(", ")
            )));
        }
        Ok(Self {
            schema: Arc::new(schema),
        })
    }

    /// Creates a codec for the built-in document message schema.
    pub fn builtin() -> CodecResult<Self> {
        Self::new(RecordSchema::document_message()?)
    }

    /// Creates a codec from a schema definition (JSON text).
    pub fn from_definition(definition: &str) -> CodecResult<Self> {
        Self::new(RecordSchema::parse(definition)?)
    }

    /// The schema this codec writes.
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Encodes an envelope.
    pub fn encode(&self, envelope: &DocumentEnvelope) -> CodecResult<Bytes> {
        self.encode_record(&envelope.to_record())
    }

    /// Encodes a generic record, validating it against the schema.
    pub fn encode_record(&self, record: &Record) -> CodecResult<Bytes> {
        encode_record(&self.schema, record).map(Bytes::from)
    }

    /// Decodes an envelope.
    pub fn decode(&self, bytes: &[u8]) -> CodecResult<DocumentEnvelope> {
        let record = decode_record(&self.schema, bytes)?;
        DocumentEnvelope::from_record(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn widget() -> DocumentEnvelope {
        DocumentEnvelope::new(
            "abc123",
            r#"{"_id":"abc123","name":"widget"}"#,
            "2024-05-01T12:30:00.000Z",
        )
    }

    #[test]
    fn roundtrip_widget() {
        let codec = SchemaCodec::builtin().unwrap();
        let bytes = codec.encode(&widget()).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), widget());
    }

    #[test]
    fn roundtrip_empty_strings() {
        let codec = SchemaCodec::builtin().unwrap();
        let envelope = DocumentEnvelope::new("", "", "");
        let bytes = codec.encode(&envelope).unwrap();
        assert_eq!(bytes.as_ref(), &[0x00, 0x00, 0x00]);
        assert_eq!(codec.decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn rejects_foreign_layout() {
        let result = SchemaCodec::from_definition(
            r#"{"type":"record","name":"DocumentMessage","fields":[
                {"name":"id","type":"string"},
                {"name":"source_data","type":"string"},
                {"name":"Timestamp","type":"string"}]}"#,
        );
        assert!(matches!(result, Err(CodecError::InvalidSchema { .. })));
    }

    #[test]
    fn record_with_wrong_type_fails_encode() {
        let codec = SchemaCodec::builtin().unwrap();
        let record = widget().to_record().with(FIELD_TIMESTAMP, 1_714_566_600_i64);
        let err = codec.encode_record(&record).unwrap_err();
        assert!(err.is_schema_violation());
    }

    #[test]
    fn from_record_missing_field() {
        let record = Record::new().with(FIELD_ID, "x");
        assert!(matches!(
            DocumentEnvelope::from_record(&record),
            Err(CodecError::MissingField { .. })
        ));
    }

    #[test]
    fn truncated_payload_fails_decode() {
        let codec = SchemaCodec::builtin().unwrap();
        let bytes = codec.encode(&widget()).unwrap();
        let result = codec.decode(&bytes[..bytes.len() - 1]);
        assert_eq!(result, Err(CodecError::UnexpectedEof));
    }

    proptest! {
        #[test]
        fn roundtrip_any_envelope(id in ".*", source in ".*", ts in ".*") {
            let codec = SchemaCodec::builtin().unwrap();
            let envelope = DocumentEnvelope::new(id, source, ts);
            let bytes = codec.encode(&envelope).unwrap();
            prop_assert_eq!(codec.decode(&bytes).unwrap(), envelope);
        }
    }
}
