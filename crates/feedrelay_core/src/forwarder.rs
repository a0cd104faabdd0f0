//! The forwarder state machine.
//!
//! ```text
//! Idle ──run()──▶ Running ──shutdown──▶ Draining ──in-flight done──▶ Stopped
//!                    │                                                 ▲
//!                    └───────────────── fatal error ───────────────────┘
//! ```
//!
//! Events are processed strictly one at a time in feed order: build the
//! envelope, encode it, publish it, and only after the bus confirms, save
//! its resume token. A crash between publish and save replays that event on
//! restart (at-least-once); a position is never saved ahead of its publish.

use crate::config::{ForwarderConfig, SchemaViolationPolicy};
use crate::envelope::build_envelope;
use crate::error::{BusError, ForwardError, ForwardResult};
use crate::event::{ChangeEvent, ResumeToken, StreamId};
use crate::feed::{display_position, ChangeFeedReader, ChangeStreamSource};
use crate::publish::{MessageBus, Publisher};
use crate::shutdown::ShutdownHandle;
use crate::stats::ForwarderStats;
use crate::tracker::ResumeTracker;
use feedrelay_codec::SchemaCodec;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span};

/// Lifecycle state of a forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    /// Created, not yet started.
    Idle,
    /// Reading and forwarding events.
    Running,
    /// Shutdown requested; finishing the in-flight event.
    Draining,
    /// Finished, either gracefully or on error.
    Stopped,
}

impl ForwarderState {
    /// Returns true while the forwarder owns its feed subscription.
    pub fn is_active(&self) -> bool {
        matches!(self, ForwarderState::Running | ForwarderState::Draining)
    }

    /// Returns true if [`Forwarder::run`] may be called.
    pub fn can_start(&self) -> bool {
        matches!(self, ForwarderState::Idle)
    }

    /// Lowercase state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwarderState::Idle => "idle",
            ForwarderState::Running => "running",
            ForwarderState::Draining => "draining",
            ForwarderState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ForwarderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cloneable read-only view of a forwarder's state and statistics.
#[derive(Debug, Clone)]
pub struct ForwarderMonitor {
    stream: StreamId,
    state: Arc<RwLock<ForwarderState>>,
    stats: Arc<RwLock<ForwarderStats>>,
    shutdown: ShutdownHandle,
}

impl ForwarderMonitor {
    /// The stream being forwarded.
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Current state. A running forwarder reports `Draining` as soon as
    /// shutdown is requested.
    pub fn state(&self) -> ForwarderState {
        match *self.state.read() {
            ForwarderState::Running if self.shutdown.is_requested() => ForwarderState::Draining,
            state => state,
        }
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> ForwarderStats {
        self.stats.read().clone()
    }
}

/// Drives one stream: change feed → codec → publisher → resume tracker.
pub struct Forwarder<S, B, T>
where
    S: ChangeStreamSource,
    B: MessageBus,
    T: ResumeTracker,
{
    config: ForwarderConfig,
    codec: SchemaCodec,
    source: S,
    publisher: Publisher<B>,
    tracker: T,
    shutdown: ShutdownHandle,
    state: Arc<RwLock<ForwarderState>>,
    stats: Arc<RwLock<ForwarderStats>>,
}

impl<S, B, T> Forwarder<S, B, T>
where
    S: ChangeStreamSource,
    B: MessageBus,
    T: ResumeTracker,
{
    /// Creates an idle forwarder.
    pub fn new(config: ForwarderConfig, codec: SchemaCodec, source: S, bus: B, tracker: T) -> Self {
        let publisher = Publisher::new(bus, config.publish.clone());
        Self {
            config,
            codec,
            source,
            publisher,
            tracker,
            shutdown: ShutdownHandle::new(),
            state: Arc::new(RwLock::new(ForwarderState::Idle)),
            stats: Arc::new(RwLock::new(ForwarderStats::default())),
        }
    }

    /// Uses an existing shutdown handle, e.g. one shared by the process.
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The stream being forwarded.
    pub fn stream(&self) -> &StreamId {
        &self.config.stream
    }

    /// The configuration.
    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ForwarderState {
        self.monitor().state()
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> ForwarderStats {
        self.stats.read().clone()
    }

    /// A handle for observing this forwarder from other threads.
    pub fn monitor(&self) -> ForwarderMonitor {
        ForwarderMonitor {
            stream: self.config.stream.clone(),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
            shutdown: self.shutdown.clone(),
        }
    }

    /// A handle for requesting a graceful drain.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs until shutdown or a fatal error.
    ///
    /// Returns the final statistics after a graceful drain.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the pipeline. The forwarder is left in
    /// `Stopped` either way and cannot be restarted; build a new one, which
    /// resumes from the last saved position.
    pub fn run(&mut self) -> ForwardResult<ForwarderStats> {
        let span = info_span!(
            "forwarder",
            stream = %self.config.stream,
            topic = %self.config.publish.topic
        );
        let _enter = span.enter();

        let state = *self.state.read();
        if !state.can_start() {
            return Err(ForwardError::InvalidStateTransition {
                from: state.to_string(),
                to: ForwarderState::Running.to_string(),
            });
        }

        let resume_from = match self.tracker.load() {
            Ok(token) => token,
            Err(source) => {
                return Err(self.fail(ForwardError::PersistenceError {
                    token: None,
                    source,
                }))
            }
        };
        info!(
            resume_token = %display_position(resume_from.as_ref()),
            on_schema_violation = %self.config.on_schema_violation,
            "starting forwarder"
        );
        self.set_state(ForwarderState::Running);
        self.stats.write().started_at = Some(Instant::now());

        let mut reader = match ChangeFeedReader::open(
            &self.source,
            self.config.feed.clone(),
            self.config.stream.clone(),
            resume_from.clone(),
            self.shutdown.clone(),
        ) {
            Ok(reader) => reader,
            Err(e) => return Err(self.fail(ForwardError::from_feed(e, resume_from))),
        };

        let outcome = loop {
            let event = match reader.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => break Ok(()),
                Err(e) => break Err(ForwardError::from_feed(e, reader.position().cloned())),
            };
            self.stats.write().feed_reconnects = reader.reconnects();

            if let Err(e) = self.forward(event) {
                break Err(e);
            }
            if self.shutdown.is_requested() {
                break Ok(());
            }
        };
        self.stats.write().feed_reconnects = reader.reconnects();
        reader.close();

        match outcome {
            Ok(()) => {
                if self.shutdown.is_requested() {
                    self.set_state(ForwarderState::Draining);
                }
                self.set_state(ForwarderState::Stopped);
                let stats = self.stats();
                info!(
                    resume_token = %display_position(stats.last_saved.as_ref()),
                    published = stats.events_published,
                    skipped = stats.events_skipped,
                    "forwarder stopped"
                );
                Ok(stats)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Forwards one event: envelope, encode, publish, then save.
    fn forward(&self, event: ChangeEvent) -> ForwardResult<()> {
        let token = event.resume_token.clone();
        let _span = info_span!("event", resume_token = %token).entered();
        self.stats.write().events_seen += 1;
        if self.shutdown.is_requested() {
            self.set_state(ForwarderState::Draining);
        }

        let payload = match build_envelope(&event).and_then(|e| self.codec.encode(&e)) {
            Ok(payload) => payload,
            Err(source) => match self.config.on_schema_violation {
                SchemaViolationPolicy::Halt => {
                    return Err(ForwardError::SchemaViolation { token, source })
                }
                SchemaViolationPolicy::Skip => {
                    error!(
                        resume_token = %token,
                        error_kind = "schema_violation",
                        error = %source,
                        "skipping event that violates the schema"
                    );
                    self.stats.write().events_skipped += 1;
                    return Ok(());
                }
            },
        };

        let result = self
            .publisher
            .publish_draining(&payload, &self.shutdown, self.config.drain_timeout);
        self.stats.write().publish_retries += u64::from(result.retries());

        if !result.success {
            if result.deadline_exceeded() {
                return Err(ForwardError::DrainTimeout {
                    timeout: self.config.drain_timeout,
                    token,
                });
            }
            return Err(ForwardError::PublishRejected {
                token,
                attempts: result.attempts,
                source: result
                    .last_error
                    .unwrap_or_else(|| BusError::rejected("publish failed")),
            });
        }
        let message_id = result.message_id.unwrap_or_default();

        if let Err(source) = self.tracker.save(&token) {
            return Err(ForwardError::PersistenceError {
                token: Some(token),
                source,
            });
        }

        info!(
            resume_token = %token,
            message_id = %message_id,
            attempt = result.attempts,
            "event forwarded"
        );
        let mut stats = self.stats.write();
        stats.events_published += 1;
        stats.last_saved = Some(token);
        stats.last_message_id = Some(message_id);
        stats.last_saved_at = Some(Instant::now());
        Ok(())
    }

    fn set_state(&self, state: ForwarderState) {
        *self.state.write() = state;
    }

    fn last_saved(&self) -> Option<ResumeToken> {
        self.stats.read().last_saved.clone()
    }

    /// Records a fatal error and stops.
    fn fail(&self, error: ForwardError) -> ForwardError {
        error!(
            error_kind = error.kind_name(),
            resume_token = %display_position(self.last_saved().as_ref()),
            error = %error,
            "forwarder stopped on error"
        );
        self.stats.write().last_error = Some(error.to_string());
        self.set_state(ForwarderState::Stopped);
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeedConfig, RetryConfig};
    use crate::error::{ErrorKind, FeedError};
    use crate::event::Document;
    use crate::feed::MemoryChangeStream;
    use crate::publish::MemoryBus;
    use crate::tracker::MemoryResumeTracker;
    use chrono::Utc;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    type TestForwarder = Forwarder<MemoryChangeStream, Arc<MemoryBus>, MemoryResumeTracker>;

    struct Harness {
        feed: MemoryChangeStream,
        bus: Arc<MemoryBus>,
        tracker: MemoryResumeTracker,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                feed: MemoryChangeStream::new(),
                bus: Arc::new(MemoryBus::new()),
                tracker: MemoryResumeTracker::new(),
            }
        }

        fn config(&self) -> ForwarderConfig {
            let fast = RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false);
            ForwarderConfig::new(StreamId::new("shop", "orders"), "orders-topic")
                .with_feed(
                    FeedConfig::new()
                        .with_retry(fast.clone())
                        .with_poll_interval(Duration::from_millis(10)),
                )
                .with_publish_retry(fast)
        }

        fn forwarder(&self, config: ForwarderConfig) -> TestForwarder {
            Forwarder::new(
                config,
                SchemaCodec::builtin().unwrap(),
                self.feed.clone(),
                Arc::clone(&self.bus),
                self.tracker.clone(),
            )
        }

        fn insert(&self, value: serde_json::Value) -> ResumeToken {
            let document: Document = match value {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            };
            let token = self.feed.next_token();
            self.feed
                .emit(ChangeEvent::insert(token.clone(), document, Utc::now()));
            token
        }
    }

    /// Runs a forwarder on a thread until `published` messages reach the
    /// bus, then shuts it down.
    fn run_until(
        harness: &Harness,
        mut forwarder: TestForwarder,
        published: usize,
    ) -> ForwardResult<ForwarderStats> {
        let shutdown = forwarder.shutdown_handle();
        let worker = thread::spawn(move || forwarder.run());
        let bus = Arc::clone(&harness.bus);
        let deadline = Instant::now() + Duration::from_secs(10);
        while bus.published().len() < published && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        shutdown.request();
        worker.join().unwrap()
    }

    #[test]
    fn forwards_in_order_and_saves_after_publish() {
        let harness = Harness::new();
        let tokens: Vec<_> = (1..=5).map(|n| harness.insert(json!({ "_id": n }))).collect();

        let stats = run_until(&harness, harness.forwarder(harness.config()), 5).unwrap();
        assert_eq!(stats.events_published, 5);
        assert_eq!(harness.tracker.history(), tokens);
        assert_eq!(stats.last_saved.as_ref(), tokens.last());

        let codec = SchemaCodec::builtin().unwrap();
        let ids: Vec<String> = harness
            .bus
            .published()
            .iter()
            .map(|m| codec.decode(&m.payload).unwrap().id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn resumes_from_saved_position() {
        let harness = Harness::new();
        harness.insert(json!({"_id": 1}));
        let second = harness.insert(json!({"_id": 2}));
        harness.insert(json!({"_id": 3}));

        let harness = Harness {
            tracker: MemoryResumeTracker::with_position(second),
            ..harness
        };
        run_until(&harness, harness.forwarder(harness.config()), 1).unwrap();

        let published = harness.bus.published();
        assert_eq!(published.len(), 1);
        let codec = SchemaCodec::builtin().unwrap();
        assert_eq!(codec.decode(&published[0].payload).unwrap().id, "3");
    }

    #[test]
    fn state_transitions() {
        let harness = Harness::new();
        let mut forwarder = harness.forwarder(harness.config());
        assert_eq!(forwarder.state(), ForwarderState::Idle);
        let monitor = forwarder.monitor();
        let shutdown = forwarder.shutdown_handle();

        let worker = thread::spawn(move || {
            let result = forwarder.run();
            (result, forwarder)
        });
        let deadline = Instant::now() + Duration::from_secs(10);
        while monitor.state() != ForwarderState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(monitor.state(), ForwarderState::Running);

        shutdown.request();
        let (result, mut forwarder) = worker.join().unwrap();
        result.unwrap();
        assert_eq!(monitor.state(), ForwarderState::Stopped);
        assert!(matches!(
            forwarder.run(),
            Err(ForwardError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn schema_violation_halts_by_default() {
        let harness = Harness::new();
        harness.insert(json!({"_id": 1}));
        let bad = harness.insert(json!({"name": "no id"}));
        harness.insert(json!({"_id": 3}));

        let mut forwarder = harness.forwarder(harness.config());
        let err = forwarder.run().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::SchemaViolation));
        assert!(matches!(err, ForwardError::SchemaViolation { ref token, .. } if *token == bad));
        assert_eq!(harness.bus.published().len(), 1);
        assert_eq!(harness.tracker.history().len(), 1);
        assert_eq!(forwarder.state(), ForwarderState::Stopped);
        assert!(forwarder.stats().last_error.is_some());
    }

    #[test]
    fn schema_violation_skip_policy_continues() {
        let harness = Harness::new();
        let first = harness.insert(json!({"_id": 1}));
        harness.insert(json!({"_id": null}));
        let third = harness.insert(json!({"_id": 3}));

        let config = harness
            .config()
            .with_schema_violation_policy(SchemaViolationPolicy::Skip);
        let stats = run_until(&harness, harness.forwarder(config), 2).unwrap();
        assert_eq!(stats.events_skipped, 1);
        assert_eq!(stats.events_published, 2);
        assert_eq!(harness.tracker.history(), vec![first, third]);
    }

    #[test]
    fn publish_rejection_halts_without_saving() {
        let harness = Harness::new();
        harness.insert(json!({"_id": 1}));
        harness
            .bus
            .fail_next([BusError::Unauthorized {
                message: "permission denied".into(),
            }]);

        let err = harness.forwarder(harness.config()).run().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::PublishRejected));
        assert!(harness.tracker.history().is_empty());
    }

    #[test]
    fn transient_publish_failures_are_absorbed() {
        let harness = Harness::new();
        harness.insert(json!({"_id": 1}));
        harness.bus.fail_next([
            BusError::transient("overloaded"),
            BusError::transient("overloaded"),
        ]);

        let stats = run_until(&harness, harness.forwarder(harness.config()), 1).unwrap();
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.publish_retries, 2);
        assert_eq!(harness.bus.attempts(), 3);
        assert_eq!(harness.tracker.history().len(), 1);
    }

    #[test]
    fn persistence_error_halts() {
        let harness = Harness::new();
        harness.insert(json!({"_id": 1}));
        harness.insert(json!({"_id": 2}));
        harness.tracker.fail_next_saves(1);

        let err = harness.forwarder(harness.config()).run().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::PersistenceError));
        // Published but not saved: replayed on restart.
        assert_eq!(harness.bus.published().len(), 1);
        assert!(harness.tracker.current().is_none());
    }

    #[test]
    fn expired_resume_token_is_fatal() {
        let harness = Harness::new();
        let first = harness.insert(json!({"_id": 1}));
        harness.insert(json!({"_id": 2}));
        harness.feed.truncate_history(2);
        let harness = Harness {
            tracker: MemoryResumeTracker::with_position(first.clone()),
            ..harness
        };

        let err = harness.forwarder(harness.config()).run().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ResumeTokenExpired));
        assert!(matches!(
            err,
            ForwardError::ResumeTokenExpired { token: Some(ref t), .. } if *t == first
        ));
    }

    #[test]
    fn feed_exhaustion_is_fatal() {
        let harness = Harness::new();
        harness
            .feed
            .fail_subscribes((0..3).map(|_| FeedError::unavailable_retryable("down")));
        let err = harness.forwarder(harness.config()).run().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::FeedUnavailable));
    }

    #[test]
    fn drain_timeout_abandons_in_flight_retries() {
        let harness = Harness::new();
        harness.insert(json!({"_id": 1}));
        harness
            .bus
            .fail_next((0..10).map(|_| BusError::transient("network")));

        let config = harness
            .config()
            .with_publish_retry(
                RetryConfig::new(10)
                    .with_initial_delay(Duration::from_secs(5))
                    .with_jitter(false),
            )
            .with_drain_timeout(Duration::from_millis(50));
        let mut forwarder = harness.forwarder(config);
        let shutdown = forwarder.shutdown_handle();
        let worker = thread::spawn(move || forwarder.run());
        let deadline = Instant::now() + Duration::from_secs(10);
        while harness.bus.attempts() < 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        shutdown.request();

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, ForwardError::DrainTimeout { .. }));
        assert!(harness.tracker.history().is_empty());
    }
}
