//! Binary record encoder.

use crate::error::{CodecError, CodecResult};
use crate::schema::RecordSchema;
use crate::value::{Datum, Record};

/// Encode a record against a schema.
///
/// Fields are written in schema order. Every schema field must be present
/// in the record with a conforming value, and the record must not carry
/// fields the schema does not declare.
///
/// # Errors
///
/// Returns [`CodecError::MissingField`], [`CodecError::TypeMismatch`] or
/// [`CodecError::UnknownField`] if the record does not conform.
pub fn encode_record(schema: &RecordSchema, record: &Record) -> CodecResult<Vec<u8>> {
    if let Some((name, _)) = record.iter().find(|(name, _)| schema.field(name).is_none()) {
        return Err(CodecError::UnknownField {
            field: name.to_string(),
        });
    }

    let mut encoder = BinaryEncoder::new();
    for field in schema.fields() {
        let value = record.get(&field.name).ok_or_else(|| CodecError::MissingField {
            field: field.name.clone(),
        })?;
        if !value.conforms_to(field.field_type) {
            return Err(CodecError::TypeMismatch {
                field: field.name.clone(),
                expected: field.field_type.name(),
                found: value.type_name(),
            });
        }
        encoder.write_datum(value);
    }
    Ok(encoder.into_bytes())
}

/// A binary encoder producing Avro binary encoding.
///
/// - `int` and `long` are zig-zag encoded variable-length integers
/// - `string` and `bytes` are a `long` length followed by the raw bytes
/// - `boolean` is a single byte
/// - `null` is written as zero bytes
#[derive(Debug, Default)]
pub struct BinaryEncoder {
    buffer: Vec<u8>,
}

impl BinaryEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Write a zig-zag varint `long`.
    pub fn write_long(&mut self, n: i64) {
        let mut value = zigzag(n);
        while value >= 0x80 {
            self.buffer.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buffer.push(value as u8);
    }

    /// Write a boolean.
    pub fn write_bool(&mut self, b: bool) {
        self.buffer.push(u8::from(b));
    }

    /// Write length-prefixed bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_long(bytes.len() as i64);
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, text: &str) {
        self.write_bytes(text.as_bytes());
    }

    fn write_datum(&mut self, value: &Datum) {
        match value {
            Datum::Null => {}
            Datum::Boolean(b) => self.write_bool(*b),
            Datum::Int(n) => self.write_long(i64::from(*n)),
            Datum::Long(n) => self.write_long(*n),
            Datum::String(s) => self.write_string(s),
            Datum::Bytes(b) => self.write_bytes(b),
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_bytes(n: i64) -> Vec<u8> {
        let mut encoder = BinaryEncoder::new();
        encoder.write_long(n);
        encoder.into_bytes()
    }

    #[test]
    fn zigzag_small_values() {
        assert_eq!(long_bytes(0), vec![0x00]);
        assert_eq!(long_bytes(-1), vec![0x01]);
        assert_eq!(long_bytes(1), vec![0x02]);
        assert_eq!(long_bytes(-2), vec![0x03]);
        assert_eq!(long_bytes(63), vec![0x7e]);
        assert_eq!(long_bytes(64), vec![0x80, 0x01]);
    }

    #[test]
    fn zigzag_extremes() {
        assert_eq!(long_bytes(i64::MAX).len(), 10);
        assert_eq!(long_bytes(i64::MIN).len(), 10);
    }

    #[test]
    fn string_is_length_prefixed() {
        let mut encoder = BinaryEncoder::new();
        encoder.write_string("abc");
        assert_eq!(encoder.as_bytes(), &[0x06, b'a', b'b', b'c']);
    }

    #[test]
    fn record_in_schema_order() {
        let schema = RecordSchema::document_message().unwrap();
        let record = Record::new()
            .with("timestamp", "t")
            .with("id", "i")
            .with("source_data", "s");
        let bytes = encode_record(&schema, &record).unwrap();
        assert_eq!(bytes, vec![0x02, b'i', 0x02, b's', 0x02, b't']);
    }

    #[test]
    fn missing_field_is_violation() {
        let schema = RecordSchema::document_message().unwrap();
        let record = Record::new().with("id", "i").with("source_data", "s");
        let err = encode_record(&schema, &record).unwrap_err();
        assert_eq!(
            err,
            CodecError::MissingField {
                field: "timestamp".into()
            }
        );
    }

    #[test]
    fn wrong_type_is_violation() {
        let schema = RecordSchema::document_message().unwrap();
        let record = Record::new()
            .with("id", 42i64)
            .with("source_data", "s")
            .with("timestamp", "t");
        let err = encode_record(&schema, &record).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { ref field, .. } if field == "id"));
    }

    #[test]
    fn unknown_field_is_violation() {
        let schema = RecordSchema::document_message().unwrap();
        let record = Record::new()
            .with("id", "i")
            .with("source_data", "s")
            .with("timestamp", "t")
            .with("Timestamp", "t");
        let err = encode_record(&schema, &record).unwrap_err();
        assert!(matches!(err, CodecError::UnknownField { .. }));
    }
}
