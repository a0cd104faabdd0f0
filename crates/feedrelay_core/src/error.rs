//! Error types for the forwarding pipeline.

use crate::event::ResumeToken;
use feedrelay_codec::CodecError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for change feed operations.
pub type FeedResult<T> = Result<T, FeedError>;

/// Result type for message bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Result type for resume tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Result type for forwarder operations.
pub type ForwardResult<T> = Result<T, ForwardError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// The pipeline failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The change feed could not be reached or reopened.
    FeedUnavailable,
    /// The stored resume position no longer exists in the feed history.
    ResumeTokenExpired,
    /// An envelope could not be built or encoded for an event.
    SchemaViolation,
    /// The bus refused the message or retries were exhausted.
    PublishRejected,
    /// The resume position could not be durably saved.
    PersistenceError,
}

impl ErrorKind {
    /// Returns the stable name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FeedUnavailable => "feed_unavailable",
            ErrorKind::ResumeTokenExpired => "resume_token_expired",
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::PublishRejected => "publish_rejected",
            ErrorKind::PersistenceError => "persistence_error",
        }
    }

    /// Returns true for kinds that are retried inside their component.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::FeedUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a change feed source or the feed reader.
#[derive(Error, Debug)]
pub enum FeedError {
    /// The source could not be reached or the subscription broke.
    #[error("feed unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The resume token is no longer in the source's history.
    #[error("resume token expired: {message}")]
    ResumeTokenExpired {
        /// Error message.
        message: String,
    },

    /// The source reported that the watched collection is gone.
    #[error("change stream invalidated: {message}")]
    Invalidated {
        /// Error message.
        message: String,
    },

    /// A subscribe attempt exceeded its timeout.
    #[error("feed operation timed out after {after:?}")]
    Timeout {
        /// The per-attempt timeout that elapsed.
        after: Duration,
    },

    /// Reconnect attempts were exhausted.
    #[error("feed unavailable after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        #[source]
        last: Box<FeedError>,
    },
}

impl FeedError {
    /// Creates a retryable unavailability error.
    pub fn unavailable_retryable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable unavailability error.
    pub fn unavailable_fatal(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a resume token expiry error.
    pub fn expired(message: impl Into<String>) -> Self {
        Self::ResumeTokenExpired {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried by reopening the feed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Unavailable { retryable, .. } => *retryable,
            FeedError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Errors raised by a message bus client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Network failure, broker overload or similar transient condition.
    #[error("transient bus error: {message}")]
    Transient {
        /// Error message.
        message: String,
    },

    /// A publish attempt exceeded its timeout.
    #[error("publish timed out after {after:?}")]
    Timeout {
        /// The per-attempt timeout that elapsed.
        after: Duration,
    },

    /// The payload exceeds the bus limit.
    #[error("payload of {size} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Bus limit.
        max: usize,
    },

    /// The client is not allowed to publish.
    #[error("not authorized: {message}")]
    Unauthorized {
        /// Error message.
        message: String,
    },

    /// The configured topic does not exist.
    #[error("topic not found: {topic}")]
    TopicNotFound {
        /// Topic name.
        topic: String,
    },

    /// The bus rejected the message for another reason.
    #[error("message rejected: {message}")]
    Rejected {
        /// Error message.
        message: String,
    },

    /// Retries were abandoned because the drain deadline passed.
    #[error("drain deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        /// Number of attempts made.
        attempts: u32,
    },
}

impl BusError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Transient { .. } | BusError::Timeout { .. })
    }
}

/// Errors raised by a resume tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored position failed validation.
    #[error("corrupted position file {path}: {message}")]
    Corrupted {
        /// Position file path.
        path: PathBuf,
        /// What was wrong.
        message: String,
    },

    /// Another process holds the position lock for this stream.
    #[error("position for stream '{stream}' is locked by another process")]
    Locked {
        /// Stream key.
        stream: String,
    },

    /// The tracker refused the write (used by injected failures).
    #[error("save failed: {message}")]
    SaveFailed {
        /// Error message.
        message: String,
    },
}

impl TrackerError {
    /// Resume tracker failures are never retried; the pipeline halts.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required setting {key}")]
    Missing {
        /// Variable name.
        key: String,
    },

    /// A variable has a value that cannot be used.
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    pub fn invalid(key: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Configuration errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Errors that stop a forwarder.
///
/// Every variant except the lifecycle ones maps to an [`ErrorKind`].
#[derive(Error, Debug)]
pub enum ForwardError {
    /// The feed could not be opened or reopened.
    #[error("feed unavailable: {0}")]
    FeedUnavailable(#[source] FeedError),

    /// The resume position has fallen out of the feed history.
    #[error("resume token {} expired; reset the position and re-snapshot", display_token(.token))]
    ResumeTokenExpired {
        /// The position the reader tried to resume from.
        token: Option<ResumeToken>,
        /// Underlying feed error.
        #[source]
        source: FeedError,
    },

    /// An envelope could not be built or encoded.
    #[error("schema violation at {token}: {source}")]
    SchemaViolation {
        /// Position of the offending event.
        token: ResumeToken,
        /// Underlying codec error.
        #[source]
        source: CodecError,
    },

    /// The bus rejected the event or retries were exhausted.
    #[error("publish rejected at {token} after {attempts} attempts: {source}")]
    PublishRejected {
        /// Position of the event.
        token: ResumeToken,
        /// Number of attempts made.
        attempts: u32,
        /// The last bus error.
        #[source]
        source: BusError,
    },

    /// The resume position could not be loaded or saved.
    #[error("persistence error: {source}")]
    PersistenceError {
        /// The position being saved, if any.
        token: Option<ResumeToken>,
        /// Underlying tracker error.
        #[source]
        source: TrackerError,
    },

    /// The in-flight event did not finish before the drain timeout.
    #[error("drain did not complete within {timeout:?}")]
    DrainTimeout {
        /// The configured drain timeout.
        timeout: Duration,
        /// Position of the abandoned event.
        token: ResumeToken,
    },

    /// The forwarder was asked to start from a state that does not allow it.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The forwarder thread panicked.
    #[error("forwarder thread for '{stream}' panicked")]
    Panicked {
        /// Stream name.
        stream: String,
    },
}

fn display_token(token: &Option<ResumeToken>) -> String {
    token
        .as_ref()
        .map_or_else(|| "<none>".to_string(), ResumeToken::to_string)
}

impl ForwardError {
    /// Maps a feed error onto the taxonomy, attaching the resume position.
    pub fn from_feed(error: FeedError, token: Option<ResumeToken>) -> Self {
        match error {
            FeedError::ResumeTokenExpired { .. } => Self::ResumeTokenExpired {
                token,
                source: error,
            },
            other => Self::FeedUnavailable(other),
        }
    }

    /// Returns the taxonomy kind of this error, if it has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ForwardError::FeedUnavailable(_) => Some(ErrorKind::FeedUnavailable),
            ForwardError::ResumeTokenExpired { .. } => Some(ErrorKind::ResumeTokenExpired),
            ForwardError::SchemaViolation { .. } => Some(ErrorKind::SchemaViolation),
            ForwardError::PublishRejected { .. } => Some(ErrorKind::PublishRejected),
            ForwardError::PersistenceError { .. } => Some(ErrorKind::PersistenceError),
            ForwardError::DrainTimeout { .. }
            | ForwardError::InvalidStateTransition { .. }
            | ForwardError::Panicked { .. } => None,
        }
    }

    /// Returns the kind name for logging, or `"lifecycle"`.
    pub fn kind_name(&self) -> &'static str {
        self.kind().map_or("lifecycle", |k| k.as_str())
    }

    /// A forwarder error has already exhausted every local retry.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(FeedError::unavailable_retryable("connection reset").is_retryable());
        assert!(!FeedError::unavailable_fatal("bad credentials").is_retryable());
        assert!(FeedError::Timeout {
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!FeedError::expired("oplog rolled over").is_retryable());

        assert!(BusError::transient("broker overloaded").is_retryable());
        assert!(!BusError::PayloadTooLarge { size: 20, max: 10 }.is_retryable());
        assert!(!BusError::rejected("schema registry refused").is_retryable());
    }

    #[test]
    fn feed_errors_map_to_kinds() {
        let token = ResumeToken::from_bytes(vec![1, 2]);
        let err = ForwardError::from_feed(FeedError::expired("gone"), Some(token));
        assert_eq!(err.kind(), Some(ErrorKind::ResumeTokenExpired));
        assert!(err.to_string().contains("0102"));

        let err = ForwardError::from_feed(FeedError::unavailable_fatal("down"), None);
        assert_eq!(err.kind(), Some(ErrorKind::FeedUnavailable));
    }

    #[test]
    fn lifecycle_errors_have_no_kind() {
        let err = ForwardError::Panicked {
            stream: "db.coll".into(),
        };
        assert_eq!(err.kind(), None);
        assert_eq!(err.kind_name(), "lifecycle");
    }

    #[test]
    fn error_display() {
        let err = ConfigError::invalid("FEEDRELAY_DRAIN_TIMEOUT_MS", "soon", "not a number");
        assert_eq!(
            err.to_string(),
            "invalid value 'soon' for FEEDRELAY_DRAIN_TIMEOUT_MS: not a number"
        );
        assert_eq!(ErrorKind::PublishRejected.to_string(), "publish_rejected");
    }
}
