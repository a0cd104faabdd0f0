//! # FeedRelay Core
//!
//! A change-data-capture forwarder: watches a collection's change feed for
//! inserts and publishes each inserted document to a message-bus topic as a
//! schema-encoded envelope.
//!
//! This crate provides:
//! - Change feed reader with resume, reconnect and backoff
//! - Retrying publisher over an abstract message bus
//! - Crash-safe resume position tracking
//! - Forwarder state machine (idle → running → draining → stopped)
//! - Independent multi-stream execution
//!
//! ## Delivery guarantees
//!
//! - Events of one stream are processed strictly in feed order, one at a time
//! - A resume position is saved only after the bus confirmed its event
//! - A crash between publish and save replays at most that event
//!   (at-least-once; consumers are expected to be idempotent)
//! - Fatal errors stop only the owning stream
//!
//! ## Usage
//!
//! ```rust,ignore
//! use feedrelay_core::{Forwarder, ForwarderConfig, FileResumeTracker, StreamId};
//! use feedrelay_codec::SchemaCodec;
//!
//! let config = ForwarderConfig::from_env()?;
//! let tracker = FileResumeTracker::open(&config.position_dir, &config.stream)?;
//! let mut forwarder = Forwarder::new(config, SchemaCodec::builtin()?, source, bus, tracker);
//!
//! let shutdown = forwarder.shutdown_handle();
//! // on SIGTERM: shutdown.request();
//! let stats = forwarder.run()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod envelope;
mod error;
mod event;
mod feed;
mod forwarder;
mod group;
mod publish;
mod shutdown;
mod stats;
mod tracker;

pub use config::{
    env, FeedConfig, ForwarderConfig, PublishConfig, RetryConfig, SchemaViolationPolicy,
};
pub use envelope::{build_envelope, document_id, format_timestamp, DOCUMENT_ID_KEY};
pub use error::{
    BusError, BusResult, ConfigError, ConfigResult, ErrorKind, FeedError, FeedResult,
    ForwardError, ForwardResult, TrackerError, TrackerResult,
};
pub use event::{ChangeEvent, Document, OperationType, ResumeToken, StreamId};
pub use feed::{
    ChangeCursor, ChangeFeedReader, ChangeStreamSource, FeedFilter, MemoryChangeStream,
    MemoryCursor,
};
pub use forwarder::{Forwarder, ForwarderMonitor, ForwarderState};
pub use group::{ForwarderHandle, StreamGroup, StreamOutcome};
pub use publish::{MemoryBus, MessageBus, PublishResult, PublishedMessage, Publisher};
pub use shutdown::ShutdownHandle;
pub use stats::ForwarderStats;
pub use tracker::{FileResumeTracker, MemoryResumeTracker, ResumeTracker};
