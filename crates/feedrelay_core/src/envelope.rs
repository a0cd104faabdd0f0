//! Envelope construction from change events.

use crate::event::{ChangeEvent, Document};
use chrono::{DateTime, SecondsFormat, Utc};
use feedrelay_codec::{CodecError, CodecResult, DocumentEnvelope, FIELD_ID};
use serde_json::Value;

/// Document key holding the identifier.
pub const DOCUMENT_ID_KEY: &str = "_id";

/// Builds the wire envelope for an insert event.
///
/// - `id` is the stringified `_id` of the document
/// - `source_data` is the document serialized as compact JSON, keys in
///   source order
/// - `timestamp` is the event's cluster time in ISO-8601 with millisecond
///   precision
///
/// # Errors
///
/// Returns a schema violation if the event carries no document, the
/// document has no `_id`, or the `_id` cannot be turned into a string.
pub fn build_envelope(event: &ChangeEvent) -> CodecResult<DocumentEnvelope> {
    let document = event
        .full_document
        .as_ref()
        .ok_or_else(|| CodecError::MissingField {
            field: "fullDocument".to_string(),
        })?;
    let id = document_id(document)?;
    let source_data = serde_json::to_string(document)
        .map_err(|e| CodecError::invalid_structure(format!("document serialization: {e}")))?;
    Ok(DocumentEnvelope::new(
        id,
        source_data,
        format_timestamp(&event.cluster_time),
    ))
}

/// Stringifies a document's `_id`.
///
/// Strings are used as-is, numbers in their JSON form, and extended-JSON
/// object ids (`{"$oid": "..."}`) as their hex string.
pub fn document_id(document: &Document) -> CodecResult<String> {
    let value = document
        .get(DOCUMENT_ID_KEY)
        .ok_or_else(|| CodecError::MissingField {
            field: DOCUMENT_ID_KEY.to_string(),
        })?;
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Object(map) => match (map.len(), map.get("$oid")) {
            (1, Some(Value::String(oid))) => Ok(oid.clone()),
            _ => Err(id_mismatch("object")),
        },
        Value::Null => Err(id_mismatch("null")),
        Value::Bool(_) => Err(id_mismatch("boolean")),
        Value::Array(_) => Err(id_mismatch("array")),
    }
}

fn id_mismatch(found: &'static str) -> CodecError {
    CodecError::TypeMismatch {
        field: FIELD_ID.to_string(),
        expected: "string",
        found,
    }
}

/// Formats a timestamp as ISO-8601 UTC with milliseconds, e.g.
/// `2024-05-01T12:30:00.000Z`.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
