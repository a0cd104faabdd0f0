//! Property-based test generators using proptest.
//!
//! Provides strategies for envelopes, documents and change feed scripts.

use feedrelay_codec::DocumentEnvelope;
use feedrelay_core::{Document, OperationType};
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for arbitrary envelopes, including empty and non-ASCII strings.
pub fn envelope_strategy() -> impl Strategy<Value = DocumentEnvelope> {
    (any::<String>(), any::<String>(), any::<String>())
        .prop_map(|(id, source_data, timestamp)| DocumentEnvelope::new(id, source_data, timestamp))
}

/// Strategy for document ids that stringify cleanly.
pub fn document_id_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-zA-Z0-9]{1,24}".prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[0-9a-f]{24}".prop_map(|hex| {
            let mut oid = Map::new();
            oid.insert("$oid".to_string(), Value::from(hex));
            Value::Object(oid)
        }),
    ]
}

/// Strategy for flat JSON field values.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        ".{0,16}".prop_map(Value::from),
    ]
}

/// Strategy for documents with a valid `_id` and up to eight other fields.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    (
        document_id_strategy(),
        prop::collection::vec(("[a-z][a-z0-9_]{0,11}", field_value_strategy()), 0..8),
    )
        .prop_map(|(id, fields)| {
            let mut document = Map::new();
            document.insert("_id".to_string(), id);
            for (name, value) in fields {
                if name != "_id" {
                    document.insert(name, value);
                }
            }
            document
        })
}

/// Strategy for operations a change feed can report.
pub fn operation_strategy() -> impl Strategy<Value = OperationType> {
    prop_oneof![
        3 => Just(OperationType::Insert),
        1 => Just(OperationType::Update),
        1 => Just(OperationType::Replace),
        1 => Just(OperationType::Delete),
    ]
}

/// Strategy for a feed script: a sequence of operations with the document
/// each insert carries.
pub fn feed_script_strategy(
    max_len: usize,
) -> impl Strategy<Value = Vec<(OperationType, Document)>> {
    prop::collection::vec((operation_strategy(), document_strategy()), 1..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedrelay_core::document_id;

    proptest! {
        #[test]
        fn generated_documents_have_ids(doc in document_strategy()) {
            prop_assert!(document_id(&doc).is_ok());
        }

        #[test]
        fn scripts_are_non_empty(script in feed_script_strategy(10)) {
            prop_assert!(!script.is_empty() && script.len() < 10);
        }
    }
}
