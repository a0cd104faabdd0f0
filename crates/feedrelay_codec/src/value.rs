//! Dynamic record values.

use crate::schema::FieldType;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datum {
    /// Null value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// UTF-8 text.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Datum {
    /// Returns the schema type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Boolean(_) => "boolean",
            Datum::Int(_) => "int",
            Datum::Long(_) => "long",
            Datum::String(_) => "string",
            Datum::Bytes(_) => "bytes",
        }
    }

    /// Returns true if this value can be written as `field_type`.
    ///
    /// An `int` is accepted where a `long` is declared; no other promotion
    /// is performed.
    pub fn conforms_to(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (Datum::Null, FieldType::Null)
                | (Datum::Boolean(_), FieldType::Boolean)
                | (Datum::Int(_), FieldType::Int)
                | (Datum::Int(_), FieldType::Long)
                | (Datum::Long(_), FieldType::Long)
                | (Datum::String(_), FieldType::String)
                | (Datum::Bytes(_), FieldType::Bytes)
        )
    }

    /// Returns the text if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::String(s)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::String(s.to_string())
    }
}

impl From<i64> for Datum {
    fn from(n: i64) -> Self {
        Datum::Long(n)
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Boolean(b)
    }
}

/// A record as a list of named values.
///
/// Field order in a `Record` is not significant for encoding; the schema
/// decides the wire order. Decoded records come back in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, Datum)>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, replacing any existing value with the same name.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Datum>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a field, replacing any existing value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Datum>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Datum)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces() {
        let record = Record::new().with("id", "a").with("id", "b");
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("id").and_then(Datum::as_str), Some("b"));
    }

    #[test]
    fn int_promotes_to_long_only() {
        assert!(Datum::Int(1).conforms_to(FieldType::Long));
        assert!(!Datum::Long(1).conforms_to(FieldType::Int));
        assert!(!Datum::String("1".into()).conforms_to(FieldType::Long));
    }
}
