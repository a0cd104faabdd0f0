//! Position commands: inspect or reset a stream's saved resume token.

use super::OutputFormat;
use crate::error::CliError;
use clap::Args;
use feedrelay_core::{env, FileResumeTracker, ResumeTracker, StreamId};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Identifies one stream's position file.
#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Database name
    #[arg(long, env = env::DATABASE)]
    pub database: String,

    /// Collection name
    #[arg(long, env = env::COLLECTION)]
    pub collection: String,

    /// Directory holding resume positions
    #[arg(long, env = env::POSITION_DIR, default_value = "positions")]
    pub position_dir: PathBuf,
}

impl StreamArgs {
    fn stream(&self) -> StreamId {
        StreamId::new(self.database.trim(), self.collection.trim())
    }
}

/// A saved position as shown to the operator.
#[derive(Debug, Serialize)]
pub struct PositionReport {
    /// `database.collection`.
    pub stream: String,
    /// Hex-encoded resume token, if one is saved.
    pub resume_token: Option<String>,
    /// Position file path.
    pub path: String,
}

/// Reads the saved position without disturbing a running forwarder.
pub fn show(args: &StreamArgs, format: OutputFormat) -> Result<PositionReport, CliError> {
    let stream = args.stream();
    let token = FileResumeTracker::peek(&args.position_dir, &stream)?;
    let report = PositionReport {
        stream: stream.to_string(),
        resume_token: token.map(|t| t.to_hex()),
        path: FileResumeTracker::path_for(&args.position_dir, &stream)
            .display()
            .to_string(),
    };

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&report).map_err(|e| CliError::Runtime(e.to_string()))?
        ),
        OutputFormat::Text => {
            println!("Stream:       {}", report.stream);
            println!(
                "Resume token: {}",
                report.resume_token.as_deref().unwrap_or("<none>")
            );
            println!("File:         {}", report.path);
        }
    }
    Ok(report)
}

/// Deletes the saved position so the next run subscribes without a token.
///
/// Fails with a lock error while a forwarder owns the stream.
pub fn reset(args: &StreamArgs) -> Result<(), CliError> {
    let stream = args.stream();
    let tracker = FileResumeTracker::open(&args.position_dir, &stream)?;
    let previous = tracker.load().ok().flatten();
    tracker.clear()?;
    info!(
        stream = %stream,
        previous = %previous.map(|t| t.to_hex()).unwrap_or_else(|| "<none>".into()),
        "position reset"
    );
    println!("Position of {stream} cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedrelay_core::ResumeToken;
    use tempfile::TempDir;

    fn args(dir: &TempDir) -> StreamArgs {
        StreamArgs {
            database: "shop".into(),
            collection: "orders".into(),
            position_dir: dir.path().to_path_buf(),
        }
    }

    #[test]
    fn show_and_reset() {
        let dir = TempDir::new().unwrap();
        let args = args(&dir);

        let report = show(&args, OutputFormat::Json).unwrap();
        assert_eq!(report.stream, "shop.orders");
        assert!(report.resume_token.is_none());

        {
            let tracker = FileResumeTracker::open(dir.path(), &args.stream()).unwrap();
            tracker
                .save(&ResumeToken::from_bytes(vec![0xab, 0xcd]))
                .unwrap();
            assert_eq!(tracker.position_path().display().to_string(), report.path);
        }
        let report = show(&args, OutputFormat::Text).unwrap();
        assert_eq!(report.resume_token.as_deref(), Some("abcd"));

        reset(&args).unwrap();
        assert!(show(&args, OutputFormat::Text).unwrap().resume_token.is_none());
    }

    #[test]
    fn reset_refuses_running_stream() {
        let dir = TempDir::new().unwrap();
        let args = args(&dir);
        let _running = FileResumeTracker::open(dir.path(), &args.stream()).unwrap();
        assert!(matches!(reset(&args), Err(CliError::Tracker(_))));
    }
}
