//! Record schema definitions.
//!
//! Schemas are written in the Avro JSON schema format. Only flat records of
//! primitive fields are supported, which is all the wire contract needs:
//!
//! ```json
//! { "type": "record", "name": "DocumentMessage",
//!   "fields": [ { "name": "id", "type": "string" } ] }
//! ```

use crate::error::{CodecError, CodecResult};
use serde::Deserialize;
use std::fmt;

/// The built-in schema of the document message record.
pub const DOCUMENT_MESSAGE_SCHEMA: &str = include_str!("../schemas/document-message.avsc");

/// Primitive type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// No value; encodes to zero bytes.
    Null,
    /// A single byte, 0 or 1.
    Boolean,
    /// 32-bit signed integer, zig-zag varint.
    Int,
    /// 64-bit signed integer, zig-zag varint.
    Long,
    /// Length-prefixed UTF-8.
    String,
    /// Length-prefixed raw bytes.
    Bytes,
}

impl FieldType {
    /// Returns the schema name of this type.
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Null => "null",
            FieldType::Boolean => "boolean",
            FieldType::Int => "int",
            FieldType::Long => "long",
            FieldType::String => "string",
            FieldType::Bytes => "bytes",
        }
    }

    fn from_name(name: &str) -> CodecResult<Self> {
        match name {
            "null" => Ok(FieldType::Null),
            "boolean" => Ok(FieldType::Boolean),
            "int" => Ok(FieldType::Int),
            "long" => Ok(FieldType::Long),
            "string" => Ok(FieldType::String),
            "bytes" => Ok(FieldType::Bytes),
            other => Err(CodecError::invalid_schema(format!(
                "unsupported field type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single field of a record schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
}

/// A parsed record schema.
///
/// Field order is significant: it is the order fields appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    name: String,
    namespace: Option<String>,
    fields: Vec<FieldSchema>,
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    namespace: Option<String>,
    fields: Vec<RawField>,
}

#[derive(Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    kind: RawType,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawType {
    Name(String),
    Object {
        #[serde(rename = "type")]
        kind: String,
    },
    Union(Vec<serde_json::Value>),
}

impl RecordSchema {
    /// Parses a schema from its JSON definition.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidSchema`] if the definition is not valid
    /// JSON, is not a record, uses an unsupported type, or repeats a field.
    pub fn parse(definition: &str) -> CodecResult<Self> {
        let raw: RawRecord = serde_json::from_str(definition)
            .map_err(|e| CodecError::invalid_schema(e.to_string()))?;

        if raw.kind != "record" {
            return Err(CodecError::invalid_schema(format!(
                "expected a record schema, found '{}'",
                raw.kind
            )));
        }
        validate_name(&raw.name)?;

        let mut fields: Vec<FieldSchema> = Vec::with_capacity(raw.fields.len());
        for field in raw.fields {
            validate_name(&field.name)?;
            if fields.iter().any(|f| f.name == field.name) {
                return Err(CodecError::invalid_schema(format!(
                    "duplicate field '{}'",
                    field.name
                )));
            }
            let field_type = match field.kind {
                RawType::Name(name) | RawType::Object { kind: name } => FieldType::from_name(&name)?,
                RawType::Union(_) => {
                    return Err(CodecError::invalid_schema(format!(
                        "field '{}': union types are not supported",
                        field.name
                    )))
                }
            };
            fields.push(FieldSchema {
                name: field.name,
                field_type,
            });
        }

        if fields.is_empty() {
            return Err(CodecError::invalid_schema("record has no fields"));
        }

        Ok(Self {
            name: raw.name,
            namespace: raw.namespace,
            fields,
        })
    }

    /// Returns the built-in document message schema.
    pub fn document_message() -> CodecResult<Self> {
        Self::parse(DOCUMENT_MESSAGE_SCHEMA)
    }

    /// Record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified record name (`namespace.name`).
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}.{}", self.name),
            _ => self.name.clone(),
        }
    }

    /// Fields in wire order.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if both schemas produce identical wire layouts.
    ///
    /// Names and types must match position by position; documentation and
    /// namespaces are ignored.
    pub fn same_layout(&self, other: &RecordSchema) -> bool {
        self.fields == other.fields
    }
}

fn validate_name(name: &str) -> CodecResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CodecError::invalid_schema(format!("invalid name '{name}'")))
    }
}
