//! FeedRelay CLI
//!
//! Forwards inserts from a change feed to a message-bus topic, plus operator
//! tools for positions and payloads.
//!
//! # Commands
//!
//! - `run` - Forward one or more collections until SIGINT/SIGTERM
//! - `position show` - Print a stream's saved resume token
//! - `position reset` - Clear a stream's saved resume token
//! - `decode` - Decode a payload file for verification
//! - `schema` - Print or check the record schema
//!
//! # Exit codes
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | graceful drain-to-stop |
//! | 2 | startup failure (configuration, schema, position store) |
//! | 3 | a pipeline stopped on an unrecoverable error |
//! | 4 | the drain timeout elapsed with an event in flight |

mod adapters;
mod commands;
mod error;
mod logging;
mod signals;

use clap::{Parser, Subcommand};
use commands::position::StreamArgs;
use commands::run::RunArgs;
use commands::OutputFormat;
use error::{CliError, EXIT_OK, EXIT_STARTUP};
use logging::LogFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// Change-data-capture forwarder.
#[derive(Parser)]
#[command(name = "feedrelay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Log format
    #[arg(global = true, long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward inserts until interrupted
    Run(RunArgs),

    /// Inspect or reset saved resume positions
    Position {
        #[command(subcommand)]
        action: PositionAction,
    },

    /// Decode a payload file
    Decode {
        /// Payload file
        file: PathBuf,

        /// Schema file to decode with
        #[arg(long, env = feedrelay_core::env::SCHEMA_FILE)]
        schema_file: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the record schema
    Schema {
        /// Check this schema file against the built-in schema
        #[arg(long)]
        check: Option<PathBuf>,

        /// List fields instead of printing the definition
        #[arg(long)]
        fields: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum PositionAction {
    /// Print the saved resume token
    Show {
        #[command(flatten)]
        stream: StreamArgs,

        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Clear the saved resume token, e.g. after it expired
    Reset {
        #[command(flatten)]
        stream: StreamArgs,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, cli.log_format) {
        eprintln!("{e}");
        return ExitCode::from(EXIT_STARTUP);
    }

    match execute(cli.command) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "feedrelay failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn execute(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Run(args) => commands::run::run(&args),
        Commands::Position { action } => match action {
            PositionAction::Show { stream, format } => {
                commands::position::show(&stream, format).map(|_| ())
            }
            PositionAction::Reset { stream } => commands::position::reset(&stream),
        },
        Commands::Decode {
            file,
            schema_file,
            format,
        } => commands::decode::run(&file, schema_file.as_deref(), format).map(|_| ()),
        Commands::Schema { check, fields } => commands::schema::run(check.as_deref(), fields),
        Commands::Version => {
            println!("FeedRelay CLI v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
