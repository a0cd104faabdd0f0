//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while loading a schema or encoding/decoding records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The schema definition could not be parsed or is not supported.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the schema problem.
        message: String,
    },

    /// A field required by the schema is absent from the record.
    #[error("missing field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: String,
    },

    /// A field value does not have the type the schema declares.
    #[error("field '{field}' expected {expected}, found {found}")]
    TypeMismatch {
        /// Name of the offending field.
        field: String,
        /// Type declared by the schema.
        expected: &'static str,
        /// Type of the supplied value.
        found: &'static str,
    },

    /// The record carries a field the schema does not declare.
    #[error("unknown field '{field}'")]
    UnknownField {
        /// Name of the undeclared field.
        field: String,
    },

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Input continues after the last field of the record.
    #[error("{count} trailing bytes after record")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A variable-length integer is malformed or out of range.
    #[error("invalid varint: {message}")]
    InvalidVarint {
        /// Description of the varint problem.
        message: String,
    },

    /// Invalid binary structure.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// A length prefix exceeds the decoder limit.
    #[error("size limit exceeded: claimed {claimed} bytes, max allowed {max_allowed}")]
    SizeLimitExceeded {
        /// The length the input claimed.
        claimed: u64,
        /// The maximum length the decoder accepts.
        max_allowed: u64,
    },
}

impl CodecError {
    /// Create an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an invalid varint error.
    pub fn invalid_varint(message: impl Into<String>) -> Self {
        Self::InvalidVarint {
            message: message.into(),
        }
    }

    /// Returns true if the error means a record does not conform to its schema.
    ///
    /// These are raised while encoding; everything else is a malformed
    /// schema or malformed input bytes.
    pub fn is_schema_violation(&self) -> bool {
        matches!(
            self,
            CodecError::MissingField { .. }
                | CodecError::TypeMismatch { .. }
                | CodecError::UnknownField { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_violation_classification() {
        assert!(CodecError::MissingField { field: "id".into() }.is_schema_violation());
        assert!(CodecError::TypeMismatch {
            field: "id".into(),
            expected: "string",
            found: "long",
        }
        .is_schema_violation());
        assert!(CodecError::UnknownField { field: "x".into() }.is_schema_violation());
        assert!(!CodecError::UnexpectedEof.is_schema_violation());
        assert!(!CodecError::invalid_schema("bad").is_schema_violation());
    }

    #[test]
    fn error_display() {
        let err = CodecError::TypeMismatch {
            field: "timestamp".into(),
            expected: "string",
            found: "boolean",
        };
        assert_eq!(
            err.to_string(),
            "field 'timestamp' expected string, found boolean"
        );
    }
}
