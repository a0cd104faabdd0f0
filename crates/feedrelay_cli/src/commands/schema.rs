//! Schema command implementation.

use super::run::load_codec;
use crate::error::CliError;
use feedrelay_codec::DOCUMENT_MESSAGE_SCHEMA;
use std::path::Path;

/// Prints the built-in schema, or checks a schema file against it.
pub fn run(check: Option<&Path>, fields: bool) -> Result<(), CliError> {
    let codec = load_codec(check)?;
    if fields {
        let schema = codec.schema();
        println!("{}", schema.full_name());
        for field in schema.fields() {
            println!("  {}: {}", field.name, field.field_type.name());
        }
    } else if let Some(path) = check {
        println!("{} matches the built-in schema", path.display());
    } else {
        print!("{DOCUMENT_MESSAGE_SCHEMA}");
    }
    Ok(())
}
