//! Configuration for feeds, publishing and forwarders.

use crate::error::{ConfigError, ConfigResult};
use crate::event::StreamId;
use crate::feed::FeedFilter;
use rand::Rng;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable names.
pub mod env {
    /// Database connection string.
    pub const SOURCE_URI: &str = "FEEDRELAY_SOURCE_URI";
    /// Database name.
    pub const DATABASE: &str = "FEEDRELAY_DATABASE";
    /// Collection name.
    pub const COLLECTION: &str = "FEEDRELAY_COLLECTION";
    /// Target topic.
    pub const TOPIC: &str = "FEEDRELAY_TOPIC";
    /// Drain timeout in milliseconds.
    pub const DRAIN_TIMEOUT_MS: &str = "FEEDRELAY_DRAIN_TIMEOUT_MS";
    /// Publish attempts per event.
    pub const PUBLISH_MAX_ATTEMPTS: &str = "FEEDRELAY_PUBLISH_MAX_ATTEMPTS";
    /// Per-attempt publish timeout in milliseconds.
    pub const PUBLISH_TIMEOUT_MS: &str = "FEEDRELAY_PUBLISH_TIMEOUT_MS";
    /// Feed reopen attempts.
    pub const FEED_MAX_ATTEMPTS: &str = "FEEDRELAY_FEED_MAX_ATTEMPTS";
    /// Per-attempt feed reopen timeout in milliseconds.
    pub const FEED_TIMEOUT_MS: &str = "FEEDRELAY_FEED_TIMEOUT_MS";
    /// Initial backoff in milliseconds.
    pub const BACKOFF_INITIAL_MS: &str = "FEEDRELAY_BACKOFF_INITIAL_MS";
    /// Backoff cap in milliseconds.
    pub const BACKOFF_MAX_MS: &str = "FEEDRELAY_BACKOFF_MAX_MS";
    /// Directory holding resume positions.
    pub const POSITION_DIR: &str = "FEEDRELAY_POSITION_DIR";
    /// Optional external schema file.
    pub const SCHEMA_FILE: &str = "FEEDRELAY_SCHEMA_FILE";
    /// `halt` or `skip`.
    pub const ON_SCHEMA_VIOLATION: &str = "FEEDRELAY_ON_SCHEMA_VIOLATION";
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Add up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Configuration for the change feed reader.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Retry policy for opening and reopening the subscription.
    pub retry: RetryConfig,
    /// Timeout for a single subscribe attempt.
    pub open_timeout: Duration,
    /// How long a single wait for the next event may block.
    pub poll_interval: Duration,
    /// Operations requested from the source.
    pub filter: FeedFilter,
}

impl FeedConfig {
    /// Creates a feed configuration with defaults.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::new(5),
            open_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            filter: FeedFilter::inserts_only(),
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the subscribe timeout.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the publisher.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Target topic.
    pub topic: String,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
    /// Timeout for a single publish attempt.
    pub timeout: Duration,
}

impl PublishConfig {
    /// Creates a publish configuration for a topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What the forwarder does with an event whose envelope cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaViolationPolicy {
    /// Stop the pipeline and surface the error.
    #[default]
    Halt,
    /// Log the event and continue; its position is not saved.
    Skip,
}

impl FromStr for SchemaViolationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "halt" => Ok(Self::Halt),
            "skip" => Ok(Self::Skip),
            _ => Err(ConfigError::invalid(
                env::ON_SCHEMA_VIOLATION,
                s,
                "expected 'halt' or 'skip'",
            )),
        }
    }
}

impl fmt::Display for SchemaViolationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Halt => "halt",
            Self::Skip => "skip",
        })
    }
}

/// Configuration for one forwarder.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// The watched collection.
    pub stream: StreamId,
    /// Database connection string handed to the feed source.
    pub source_uri: String,
    /// Feed reader settings.
    pub feed: FeedConfig,
    /// Publisher settings.
    pub publish: PublishConfig,
    /// How long the in-flight event may take to finish after shutdown.
    pub drain_timeout: Duration,
    /// Directory holding resume positions.
    pub position_dir: PathBuf,
    /// External schema file, checked against the built-in schema.
    pub schema_file: Option<PathBuf>,
    /// Schema violation handling.
    pub on_schema_violation: SchemaViolationPolicy,
}

impl ForwarderConfig {
    /// Creates a configuration with defaults.
    pub fn new(stream: StreamId, topic: impl Into<String>) -> Self {
        Self {
            stream,
            source_uri: String::new(),
            feed: FeedConfig::default(),
            publish: PublishConfig::new(topic),
            drain_timeout: Duration::from_secs(30),
            position_dir: PathBuf::from("positions"),
            schema_file: None,
            on_schema_violation: SchemaViolationPolicy::Halt,
        }
    }

    /// Sets the source connection string.
    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = uri.into();
        self
    }

    /// Sets the feed configuration.
    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }

    /// Sets the publish retry policy.
    pub fn with_publish_retry(mut self, retry: RetryConfig) -> Self {
        self.publish.retry = retry;
        self
    }

    /// Sets the drain timeout.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets the position directory.
    pub fn with_position_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.position_dir = dir.into();
        self
    }

    /// Sets the schema violation policy.
    pub fn with_schema_violation_policy(mut self, policy: SchemaViolationPolicy) -> Self {
        self.on_schema_violation = policy;
        self
    }

    /// Loads the configuration from `FEEDRELAY_*` environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key lookup.
    ///
    /// `FEEDRELAY_SOURCE_URI`, `FEEDRELAY_DATABASE`, `FEEDRELAY_COLLECTION`
    /// and `FEEDRELAY_TOPIC` are required; everything else has a default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an absent required key and
    /// [`ConfigError::Invalid`] for a value that does not parse.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            lookup(key).ok_or_else(|| ConfigError::Missing {
                key: key.to_string(),
            })
        };

        let stream = StreamId::new(required(env::DATABASE)?, required(env::COLLECTION)?);
        let mut config = Self::new(stream, required(env::TOPIC)?)
            .with_source_uri(required(env::SOURCE_URI)?);

        let initial = parse_millis(&lookup, env::BACKOFF_INITIAL_MS)?;
        let max = parse_millis(&lookup, env::BACKOFF_MAX_MS)?;
        let backoff = |retry: RetryConfig| {
            let retry = match initial {
                Some(d) => retry.with_initial_delay(d),
                None => retry,
            };
            match max {
                Some(d) => retry.with_max_delay(d),
                None => retry,
            }
        };

        let publish_attempts =
            parse_attempts(&lookup, env::PUBLISH_MAX_ATTEMPTS)?.unwrap_or(3);
        config.publish.retry = backoff(RetryConfig::new(publish_attempts));
        if let Some(timeout) = parse_millis(&lookup, env::PUBLISH_TIMEOUT_MS)? {
            config.publish.timeout = timeout;
        }

        let feed_attempts = parse_attempts(&lookup, env::FEED_MAX_ATTEMPTS)?.unwrap_or(5);
        config.feed.retry = backoff(RetryConfig::new(feed_attempts));
        if let Some(timeout) = parse_millis(&lookup, env::FEED_TIMEOUT_MS)? {
            config.feed.open_timeout = timeout;
        }

        if let Some(timeout) = parse_millis(&lookup, env::DRAIN_TIMEOUT_MS)? {
            config.drain_timeout = timeout;
        }
        if let Some(dir) = lookup(env::POSITION_DIR) {
            config.position_dir = PathBuf::from(dir);
        }
        config.schema_file = lookup(env::SCHEMA_FILE).map(PathBuf::from);
        if let Some(policy) = lookup(env::ON_SCHEMA_VIOLATION) {
            config.on_schema_violation = policy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.publish.topic.trim().is_empty() {
            return Err(ConfigError::invalid(env::TOPIC, "", "topic must not be empty"));
        }
        if self.publish.retry.initial_delay > self.publish.retry.max_delay {
            return Err(ConfigError::invalid(
                env::BACKOFF_INITIAL_MS,
                self.publish.retry.initial_delay.as_millis().to_string(),
                "initial backoff exceeds the maximum backoff",
            ));
        }
        Ok(())
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> ConfigResult<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| ConfigError::invalid(key, value.as_str(), e.to_string()))
        })
        .transpose()
}

fn parse_attempts<F>(lookup: &F, key: &str) -> ConfigResult<Option<u32>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| match value.trim().parse::<u32>() {
            Ok(0) => Err(ConfigError::invalid(key, value.as_str(), "must be at least 1")),
            Ok(n) => Ok(n),
            Err(e) => Err(ConfigError::invalid(key, value.as_str(), e.to_string())),
        })
        .transpose()
}
