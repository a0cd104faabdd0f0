//! Binary record decoder.

use crate::error::{CodecError, CodecResult};
use crate::schema::{FieldType, RecordSchema};
use crate::value::{Datum, Record};

/// Maximum allowed byte/string length.
/// This prevents allocation-based DoS from untrusted input.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Maximum number of bytes in a varint-encoded `long`.
const MAX_VARINT_BYTES: usize = 10;

/// Decode a record from bytes.
///
/// The input must contain exactly one record; trailing bytes are rejected.
///
/// # Errors
///
/// Returns an error if the bytes are truncated, contain invalid varints or
/// UTF-8, or have bytes left over after the last field.
pub fn decode_record(schema: &RecordSchema, bytes: &[u8]) -> CodecResult<Record> {
    let mut decoder = BinaryDecoder::new(bytes);
    let mut record = Record::new();
    for field in schema.fields() {
        let value = decoder.read_datum(field.field_type)?;
        record.insert(field.name.clone(), value);
    }
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: decoder.remaining().len(),
        });
    }
    Ok(record)
}

/// A binary decoder for Avro binary encoding.
pub struct BinaryDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Read a zig-zag varint `long`.
    pub fn read_long(&mut self) -> CodecResult<i64> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_byte()?;
            let bits = u64::from(byte & 0x7f);
            if i == MAX_VARINT_BYTES - 1 && bits > 1 {
                return Err(CodecError::invalid_varint("value overflows 64 bits"));
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(unzigzag(value));
            }
        }
        Err(CodecError::invalid_varint("varint longer than 10 bytes"))
    }

    /// Read a zig-zag varint `int`.
    pub fn read_int(&mut self) -> CodecResult<i32> {
        let n = self.read_long()?;
        i32::try_from(n).map_err(|_| CodecError::invalid_varint(format!("{n} out of int range")))
    }

    /// Read a boolean byte.
    pub fn read_bool(&mut self) -> CodecResult<bool> {
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::invalid_structure(format!(
                "invalid boolean byte {other:#04x}"
            ))),
        }
    }

    /// Read length-prefixed bytes.
    pub fn read_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.read_long()?;
        let len = u64::try_from(len)
            .map_err(|_| CodecError::invalid_structure(format!("negative length {len}")))?;
        if len > MAX_BYTES_LENGTH {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_BYTES_LENGTH,
            });
        }
        self.take(len as usize)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> CodecResult<&'a str> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    fn read_datum(&mut self, field_type: FieldType) -> CodecResult<Datum> {
        match field_type {
            FieldType::Null => Ok(Datum::Null),
            FieldType::Boolean => self.read_bool().map(Datum::Boolean),
            FieldType::Int => self.read_int().map(Datum::Int),
            FieldType::Long => self.read_long().map(Datum::Long),
            FieldType::String => self.read_string().map(|s| Datum::String(s.to_string())),
            FieldType::Bytes => self.read_bytes().map(|b| Datum::Bytes(b.to_vec())),
        }
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > self.data.len() - self.pos {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

#[allow(clippy::cast_possible_wrap)]
fn unzigzag(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BinaryEncoder;
    use proptest::prelude::*;

    #[test]
    fn decode_small_longs() {
        assert_eq!(BinaryDecoder::new(&[0x00]).read_long().unwrap(), 0);
        assert_eq!(BinaryDecoder::new(&[0x01]).read_long().unwrap(), -1);
        assert_eq!(BinaryDecoder::new(&[0x02]).read_long().unwrap(), 1);
        assert_eq!(BinaryDecoder::new(&[0x80, 0x01]).read_long().unwrap(), 64);
    }

    #[test]
    fn truncated_varint() {
        let result = BinaryDecoder::new(&[0x80]).read_long();
        assert_eq!(result, Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn overlong_varint() {
        let bytes = [0xff; 11];
        assert!(matches!(
            BinaryDecoder::new(&bytes).read_long(),
            Err(CodecError::InvalidVarint { .. })
        ));
    }

    #[test]
    fn negative_length_rejected() {
        // zig-zag 0x01 is -1
        let result = BinaryDecoder::new(&[0x01]).read_string();
        assert!(matches!(result, Err(CodecError::InvalidStructure { .. })));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut encoder = BinaryEncoder::new();
        encoder.write_long(1 << 40);
        let bytes = encoder.into_bytes();
        let result = BinaryDecoder::new(&bytes).read_bytes();
        assert!(matches!(result, Err(CodecError::SizeLimitExceeded { .. })));
    }

    #[test]
    fn length_past_end() {
        let result = BinaryDecoder::new(&[0x08, b'a', b'b']).read_string();
        assert_eq!(result, Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn invalid_utf8() {
        let result = BinaryDecoder::new(&[0x04, 0xff, 0xfe]).read_string();
        assert_eq!(result, Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn invalid_boolean() {
        let result = BinaryDecoder::new(&[0x02]).read_bool();
        assert!(matches!(result, Err(CodecError::InvalidStructure { .. })));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let schema = RecordSchema::document_message().unwrap();
        let bytes = [0x02, b'i', 0x02, b's', 0x02, b't', 0x00];
        assert_eq!(
            decode_record(&schema, &bytes),
            Err(CodecError::TrailingBytes { count: 1 })
        );
    }

    #[test]
    fn decodes_in_schema_order() {
        let schema = RecordSchema::document_message().unwrap();
        let bytes = [0x02, b'i', 0x02, b's', 0x02, b't'];
        let record = decode_record(&schema, &bytes).unwrap();
        let names: Vec<&str> = record.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "source_data", "timestamp"]);
    }

    proptest! {
        #[test]
        fn long_roundtrip(n in any::<i64>()) {
            let mut encoder = BinaryEncoder::new();
            encoder.write_long(n);
            let bytes = encoder.into_bytes();
            let mut decoder = BinaryDecoder::new(&bytes);
            prop_assert_eq!(decoder.read_long().unwrap(), n);
            prop_assert!(decoder.is_empty());
        }

        #[test]
        fn arbitrary_input_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let schema = RecordSchema::document_message().unwrap();
            let _ = decode_record(&schema, &bytes);
        }
    }
}
