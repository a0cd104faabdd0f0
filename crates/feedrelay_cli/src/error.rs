//! CLI errors and process exit codes.

use feedrelay_codec::CodecError;
use feedrelay_core::{BusError, ConfigError, ForwardError, TrackerError};
use std::io;
use thiserror::Error;

/// Exit code after a graceful drain.
pub const EXIT_OK: u8 = 0;
/// Exit code when the forwarder could not be started.
pub const EXIT_STARTUP: u8 = 2;
/// Exit code when a pipeline stopped on an unrecoverable error.
pub const EXIT_PIPELINE: u8 = 3;
/// Exit code when the drain timeout elapsed.
pub const EXIT_DRAIN_TIMEOUT: u8 = 4;

/// Errors surfaced by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schema loading, encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The position store could not be opened or read.
    #[error("position store error: {0}")]
    Tracker(#[from] TrackerError),

    /// The message bus could not be set up.
    #[error("message bus error: {0}")]
    Bus(#[from] BusError),

    /// I/O error outside the pipeline.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A single forwarder stopped on error.
    #[error(transparent)]
    Forward(#[from] ForwardError),

    /// Some streams of a multi-stream run stopped on error.
    #[error("{failed} of {total} streams stopped on error")]
    StreamsFailed {
        /// Streams that ended with an error.
        failed: usize,
        /// Streams started.
        total: usize,
        /// Whether every failure was a drain timeout.
        drain_timeout: bool,
    },

    /// The supervising runtime failed.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl CliError {
    /// The process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Forward(ForwardError::DrainTimeout { .. }) => EXIT_DRAIN_TIMEOUT,
            CliError::Forward(_) | CliError::Runtime(_) => EXIT_PIPELINE,
            CliError::StreamsFailed {
                drain_timeout: true,
                ..
            } => EXIT_DRAIN_TIMEOUT,
            CliError::StreamsFailed { .. } => EXIT_PIPELINE,
            _ => EXIT_STARTUP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn exit_codes() {
        let config = CliError::from(ConfigError::Missing {
            key: "FEEDRELAY_TOPIC".into(),
        });
        assert_eq!(config.exit_code(), EXIT_STARTUP);

        let drain = CliError::from(ForwardError::DrainTimeout {
            timeout: Duration::from_secs(1),
            token: feedrelay_core::ResumeToken::from_bytes(vec![1]),
        });
        assert_eq!(drain.exit_code(), EXIT_DRAIN_TIMEOUT);

        let panicked = CliError::from(ForwardError::Panicked {
            stream: "shop.orders".into(),
        });
        assert_eq!(panicked.exit_code(), EXIT_PIPELINE);

        let mixed = CliError::StreamsFailed {
            failed: 2,
            total: 3,
            drain_timeout: false,
        };
        assert_eq!(mixed.exit_code(), EXIT_PIPELINE);
        assert_eq!(mixed.to_string(), "2 of 3 streams stopped on error");
    }
}
