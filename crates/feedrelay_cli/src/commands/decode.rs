//! Decode command implementation.

use super::run::load_codec;
use super::OutputFormat;
use crate::error::CliError;
use feedrelay_codec::DocumentEnvelope;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// A decoded payload.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Document id.
    pub id: String,
    /// JSON-serialized source document.
    pub source_data: String,
    /// Event time.
    pub timestamp: String,
}

impl From<DocumentEnvelope> for DecodedMessage {
    fn from(envelope: DocumentEnvelope) -> Self {
        Self {
            id: envelope.id,
            source_data: envelope.source_data,
            timestamp: envelope.timestamp,
        }
    }
}

/// Decodes a spooled or captured payload and prints its fields.
pub fn run(
    path: &Path,
    schema_file: Option<&Path>,
    format: OutputFormat,
) -> Result<DecodedMessage, CliError> {
    let codec = load_codec(schema_file)?;
    let bytes = fs::read(path)?;
    let message = DecodedMessage::from(codec.decode(&bytes)?);

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&message).map_err(|e| CliError::Runtime(e.to_string()))?
        ),
        OutputFormat::Text => {
            println!("id:          {}", message.id);
            println!("timestamp:   {}", message.timestamp);
            println!("source_data: {}", message.source_data);
        }
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedrelay_codec::SchemaCodec;
    use tempfile::TempDir;

    #[test]
    fn decodes_payload_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("message.avro");
        let envelope = DocumentEnvelope::new(
            "abc123",
            r#"{"_id":"abc123","name":"widget"}"#,
            "2024-05-01T12:30:00.000Z",
        );
        let payload = SchemaCodec::builtin().unwrap().encode(&envelope).unwrap();
        fs::write(&path, &payload).unwrap();

        let message = run(&path, None, OutputFormat::Json).unwrap();
        assert_eq!(message, DecodedMessage::from(envelope));
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.avro");
        fs::write(&path, [0x10, b'a']).unwrap();
        assert!(matches!(
            run(&path, None, OutputFormat::Text),
            Err(CliError::Codec(_))
        ));
    }
}
