//! Run command implementation.

use crate::adapters::spool::DEFAULT_MAX_PAYLOAD;
use crate::adapters::{JsonlChangeStream, SpoolBus};
use crate::error::CliError;
use crate::signals;
use clap::Args;
use feedrelay_codec::SchemaCodec;
use feedrelay_core::{
    env, ConfigError, FileResumeTracker, ForwardError, Forwarder, ForwarderConfig, MessageBus,
    ShutdownHandle, StreamGroup, StreamOutcome,
};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Environment variable naming the spool directory of the file bus.
pub const SPOOL_DIR_ENV: &str = "FEEDRELAY_SPOOL_DIR";

/// Options of the `run` command. Every flag falls back to its
/// `FEEDRELAY_*` environment variable.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Change feed location (`file://<dir>` or a directory path)
    #[arg(long, env = env::SOURCE_URI)]
    pub source_uri: Option<String>,

    /// Database name
    #[arg(long, env = env::DATABASE)]
    pub database: Option<String>,

    /// Collection(s) to watch; several run as independent streams
    #[arg(long, env = env::COLLECTION, value_delimiter = ',')]
    pub collection: Vec<String>,

    /// Destination topic
    #[arg(long, env = env::TOPIC)]
    pub topic: Option<String>,

    /// Time allowed to finish the in-flight event after shutdown
    #[arg(long, env = env::DRAIN_TIMEOUT_MS, value_name = "MS")]
    pub drain_timeout_ms: Option<String>,

    /// Publish attempts per event
    #[arg(long, env = env::PUBLISH_MAX_ATTEMPTS, value_name = "N")]
    pub publish_max_attempts: Option<String>,

    /// Timeout of one publish attempt
    #[arg(long, env = env::PUBLISH_TIMEOUT_MS, value_name = "MS")]
    pub publish_timeout_ms: Option<String>,

    /// Consecutive feed reconnect attempts
    #[arg(long, env = env::FEED_MAX_ATTEMPTS, value_name = "N")]
    pub feed_max_attempts: Option<String>,

    /// Timeout of one feed subscribe attempt
    #[arg(long, env = env::FEED_TIMEOUT_MS, value_name = "MS")]
    pub feed_timeout_ms: Option<String>,

    /// First retry delay
    #[arg(long, env = env::BACKOFF_INITIAL_MS, value_name = "MS")]
    pub backoff_initial_ms: Option<String>,

    /// Retry delay cap
    #[arg(long, env = env::BACKOFF_MAX_MS, value_name = "MS")]
    pub backoff_max_ms: Option<String>,

    /// Directory holding resume positions
    #[arg(long, env = env::POSITION_DIR)]
    pub position_dir: Option<String>,

    /// Schema file that must match the built-in schema
    #[arg(long, env = env::SCHEMA_FILE)]
    pub schema_file: Option<String>,

    /// What to do with an event that violates the schema (halt, skip)
    #[arg(long, env = env::ON_SCHEMA_VIOLATION)]
    pub on_schema_violation: Option<String>,

    /// Directory the file bus spools messages into
    #[arg(long, env = SPOOL_DIR_ENV, default_value = "spool")]
    pub spool_dir: PathBuf,

    /// Largest payload the file bus accepts
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

impl RunArgs {
    fn settings(&self) -> HashMap<&'static str, String> {
        let options = [
            (env::SOURCE_URI, &self.source_uri),
            (env::DATABASE, &self.database),
            (env::TOPIC, &self.topic),
            (env::DRAIN_TIMEOUT_MS, &self.drain_timeout_ms),
            (env::PUBLISH_MAX_ATTEMPTS, &self.publish_max_attempts),
            (env::PUBLISH_TIMEOUT_MS, &self.publish_timeout_ms),
            (env::FEED_MAX_ATTEMPTS, &self.feed_max_attempts),
            (env::FEED_TIMEOUT_MS, &self.feed_timeout_ms),
            (env::BACKOFF_INITIAL_MS, &self.backoff_initial_ms),
            (env::BACKOFF_MAX_MS, &self.backoff_max_ms),
            (env::POSITION_DIR, &self.position_dir),
            (env::SCHEMA_FILE, &self.schema_file),
            (env::ON_SCHEMA_VIOLATION, &self.on_schema_violation),
        ];
        options
            .into_iter()
            .filter_map(|(key, value)| value.clone().map(|v| (key, v)))
            .collect()
    }

    /// One forwarder configuration per collection.
    pub fn configs(&self) -> Result<Vec<ForwarderConfig>, ConfigError> {
        let mut settings = self.settings();
        let collections: BTreeSet<&str> = self
            .collection
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if collections.is_empty() {
            return Err(ConfigError::Missing {
                key: env::COLLECTION.to_string(),
            });
        }

        collections
            .into_iter()
            .map(|collection| {
                settings.insert(env::COLLECTION, collection.to_string());
                ForwarderConfig::from_lookup(|key| settings.get(key).cloned())
            })
            .collect()
    }
}

/// Resolves a `file://` source URI to the directory holding feed files.
pub fn feed_dir(uri: &str) -> Result<PathBuf, ConfigError> {
    let path = match uri.split_once("://") {
        Some(("file", path)) => path,
        Some(_) => {
            return Err(ConfigError::invalid(
                env::SOURCE_URI,
                uri,
                "only file:// change feeds are built in",
            ))
        }
        None => uri,
    };
    Ok(PathBuf::from(path))
}

/// Loads the record schema, checking an external file against the
/// built-in definition.
pub fn load_codec(schema_file: Option<&Path>) -> Result<SchemaCodec, CliError> {
    match schema_file {
        Some(path) => {
            let definition = fs::read_to_string(path)?;
            let codec = SchemaCodec::from_definition(&definition)?;
            info!(schema = %path.display(), "schema file matches the built-in schema");
            Ok(codec)
        }
        None => Ok(SchemaCodec::builtin()?),
    }
}

/// Runs the command.
pub fn run(args: &RunArgs) -> Result<(), CliError> {
    let configs = args.configs()?;
    let shutdown = ShutdownHandle::new();

    let bus = Arc::new(SpoolBus::open(&args.spool_dir)?.with_max_payload(args.max_payload));
    let topics: BTreeSet<&str> = configs.iter().map(|c| c.publish.topic.as_str()).collect();
    for topic in topics {
        bus.create_topic(topic)?;
    }

    let mut group = StreamGroup::new();
    for config in configs {
        if let Err(e) = spawn_stream(&mut group, config, &bus, &shutdown) {
            // Streams already started drain before the startup error surfaces.
            shutdown.request();
            group.join_all();
            return Err(e);
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let outcomes = runtime.block_on(supervise(group, shutdown))?;

    if let Err(e) = bus.close() {
        warn!(error = %e, "failed to close message bus");
    }
    summarize(outcomes)
}

fn spawn_stream(
    group: &mut StreamGroup,
    config: ForwarderConfig,
    bus: &Arc<SpoolBus>,
    shutdown: &ShutdownHandle,
) -> Result<(), CliError> {
    let codec = load_codec(config.schema_file.as_deref())?;
    let source = JsonlChangeStream::for_stream(feed_dir(&config.source_uri)?, &config.stream);
    let tracker = FileResumeTracker::open(&config.position_dir, &config.stream)?;
    info!(
        stream = %config.stream,
        topic = %config.publish.topic,
        feed = %source.path().display(),
        "starting stream"
    );
    let forwarder = Forwarder::new(config, codec, source, Arc::clone(bus), tracker)
        .with_shutdown(shutdown.clone());
    group.spawn(forwarder)?;
    Ok(())
}

/// Waits for every stream while listening for shutdown signals.
async fn supervise(
    group: StreamGroup,
    shutdown: ShutdownHandle,
) -> Result<Vec<StreamOutcome>, CliError> {
    let signals = tokio::spawn(signals::shutdown_on_signal(shutdown));
    let outcomes = tokio::task::spawn_blocking(move || group.join_all()).await;
    signals.abort();
    outcomes.map_err(|e| CliError::Runtime(e.to_string()))
}

/// Logs per-stream outcomes and folds them into one result.
fn summarize(outcomes: Vec<StreamOutcome>) -> Result<(), CliError> {
    let total = outcomes.len();
    let mut errors: Vec<ForwardError> = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(stats) => info!(
                stream = %outcome.stream,
                published = stats.events_published,
                skipped = stats.events_skipped,
                retries = stats.publish_retries,
                "stream drained"
            ),
            Err(e) => {
                error!(
                    stream = %outcome.stream,
                    error_kind = e.kind_name(),
                    error = %e,
                    "stream failed"
                );
                errors.push(e);
            }
        }
    }

    if total == 1 {
        return match errors.pop() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        };
    }
    if errors.is_empty() {
        return Ok(());
    }
    Err(CliError::StreamsFailed {
        failed: errors.len(),
        total,
        drain_timeout: errors
            .iter()
            .all(|e| matches!(e, ForwardError::DrainTimeout { .. })),
    })
}
