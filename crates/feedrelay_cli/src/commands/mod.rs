//! CLI command implementations.

pub mod decode;
pub mod position;
pub mod run;
pub mod schema;

use clap::ValueEnum;

/// Output format of inspection commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}
