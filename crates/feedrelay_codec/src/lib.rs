//! # FeedRelay Codec
//!
//! Record schema and binary codec for FeedRelay envelopes.
//!
//! Every forwarded document is wrapped in a [`DocumentEnvelope`] and written
//! in Avro binary encoding against a fixed record schema. The schema is a
//! binary contract with downstream consumers:
//!
//! | field         | type   | content                              |
//! |---------------|--------|--------------------------------------|
//! | `id`          | string | stringified document identifier      |
//! | `source_data` | string | JSON serialization of the document   |
//! | `timestamp`   | string | ISO-8601 timestamp                   |
//!
//! Field names, types and order must not drift; any change breaks decoding
//! on the consumer side.
//!
//! ## Usage
//!
//! ```
//! use feedrelay_codec::{DocumentEnvelope, SchemaCodec};
//!
//! let codec = SchemaCodec::builtin().unwrap();
//! let envelope = DocumentEnvelope::new("1", "{}", "2024-01-01T00:00:00.000Z");
//!
//! let bytes = codec.encode(&envelope).unwrap();
//! let decoded = codec.decode(&bytes).unwrap();
//! assert_eq!(envelope, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod envelope;
mod error;
mod schema;
mod value;

pub use decoder::{decode_record, BinaryDecoder};
pub use encoder::{encode_record, BinaryEncoder};
pub use envelope::{
    DocumentEnvelope, SchemaCodec, FIELD_ID, FIELD_SOURCE_DATA, FIELD_TIMESTAMP,
};
pub use error::{CodecError, CodecResult};
pub use schema::{FieldSchema, FieldType, RecordSchema, DOCUMENT_MESSAGE_SCHEMA};
pub use value::{Datum, Record};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SchemaCodec>();
    }

    #[test]
    fn generic_record_roundtrip() {
        let schema = RecordSchema::parse(
            r#"{"type":"record","name":"Mixed","fields":[
                {"name":"flag","type":"boolean"},
                {"name":"count","type":"int"},
                {"name":"offset","type":"long"},
                {"name":"raw","type":"bytes"},
                {"name":"nothing","type":"null"}]}"#,
        )
        .unwrap();
        let record = Record::new()
            .with("flag", true)
            .with("count", Datum::Int(-7))
            .with("offset", 1_i64 << 40)
            .with("raw", Datum::Bytes(vec![0, 1, 2]))
            .with("nothing", Datum::Null);
        let bytes = encode_record(&schema, &record).unwrap();
        assert_eq!(decode_record(&schema, &bytes).unwrap(), record);
    }
}
