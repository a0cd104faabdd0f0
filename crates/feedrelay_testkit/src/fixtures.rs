//! Test fixtures and pipeline helpers.
//!
//! Provides documents, events and a fully wired in-memory pipeline.

use chrono::{DateTime, TimeZone, Utc};
use feedrelay_codec::{DocumentEnvelope, SchemaCodec};
use feedrelay_core::{
    ChangeEvent, Document, FeedConfig, ForwardResult, Forwarder, ForwarderConfig, ForwarderStats,
    MemoryBus, MemoryChangeStream, MemoryResumeTracker, OperationType, ResumeToken, RetryConfig,
    StreamId,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long helpers wait for a background forwarder before giving up.
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Converts a JSON object literal into a [`Document`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// The `{_id: "abc123", name: "widget"}` document.
pub fn widget_document() -> Document {
    document(json!({"_id": "abc123", "name": "widget"}))
}

/// A fixed cluster time: 2024-05-01T12:30:00Z.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// A retry policy with millisecond delays and no jitter.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_jitter(false)
}

/// A forwarder configuration with fast retries and a short poll interval.
pub fn test_config(stream: StreamId, topic: &str) -> ForwarderConfig {
    ForwarderConfig::new(stream, topic)
        .with_feed(
            FeedConfig::new()
                .with_retry(fast_retry(3))
                .with_poll_interval(Duration::from_millis(10)),
        )
        .with_publish_retry(fast_retry(3))
        .with_drain_timeout(Duration::from_secs(5))
}

/// Polls `condition` until it holds or [`WAIT_LIMIT`] elapses.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// The forwarder type used by [`TestPipeline`].
pub type MemoryForwarder = Forwarder<MemoryChangeStream, Arc<MemoryBus>, MemoryResumeTracker>;

/// An in-memory feed, bus and tracker wired to one stream.
///
/// Cloned handles share state, so a test can script the feed and inspect
/// the bus while a forwarder runs on another thread.
pub struct TestPipeline {
    /// The change feed.
    pub feed: MemoryChangeStream,
    /// The message bus.
    pub bus: Arc<MemoryBus>,
    /// The position store.
    pub tracker: MemoryResumeTracker,
    /// Forwarder configuration.
    pub config: ForwarderConfig,
    /// Codec used to decode published payloads.
    pub codec: SchemaCodec,
}

impl TestPipeline {
    /// Creates a pipeline for `shop.orders` publishing to `orders-topic`.
    pub fn new() -> Self {
        Self::for_stream(StreamId::new("shop", "orders"), "orders-topic")
    }

    /// Creates a pipeline for a specific stream and topic.
    ///
    /// # Panics
    ///
    /// Panics if the built-in schema fails to load.
    pub fn for_stream(stream: StreamId, topic: &str) -> Self {
        Self {
            feed: MemoryChangeStream::new(),
            bus: Arc::new(MemoryBus::new()),
            tracker: MemoryResumeTracker::new(),
            config: test_config(stream, topic),
            codec: SchemaCodec::builtin().expect("built-in schema"),
        }
    }

    /// Appends an insert of `value` with a fixed cluster time.
    pub fn insert(&self, value: Value) -> ResumeToken {
        let token = self.feed.next_token();
        self.feed.emit(ChangeEvent::insert(
            token.clone(),
            document(value),
            fixed_time(),
        ));
        token
    }

    /// Appends a non-insert event.
    pub fn emit_operation(
        &self,
        operation: OperationType,
        full_document: Option<Value>,
    ) -> ResumeToken {
        let token = self.feed.next_token();
        let mut event = ChangeEvent::without_document(operation, token.clone(), fixed_time());
        event.full_document = full_document.map(document);
        self.feed.emit(event);
        token
    }

    /// Builds a forwarder over this pipeline's shared state.
    pub fn forwarder(&self) -> MemoryForwarder {
        Forwarder::new(
            self.config.clone(),
            self.codec.clone(),
            self.feed.clone(),
            Arc::clone(&self.bus),
            self.tracker.clone(),
        )
    }

    /// Runs a forwarder on a background thread until at least `published`
    /// messages reached the bus, then requests a drain and returns its
    /// outcome.
    ///
    /// # Panics
    ///
    /// Panics if the forwarder thread panics.
    pub fn run_until_published(
        &self,
        mut forwarder: MemoryForwarder,
        published: usize,
    ) -> ForwardResult<ForwarderStats> {
        let shutdown = forwarder.shutdown_handle();
        let worker = thread::spawn(move || forwarder.run());
        wait_for(|| self.bus.published().len() >= published || worker.is_finished());
        shutdown.request();
        worker.join().expect("forwarder thread panicked")
    }

    /// Decodes every published payload, in publish order.
    ///
    /// # Panics
    ///
    /// Panics if a payload does not decode.
    pub fn published_envelopes(&self) -> Vec<DocumentEnvelope> {
        self.bus
            .published()
            .iter()
            .map(|m| self.codec.decode(&m.payload).expect("decodable payload"))
            .collect()
    }

    /// Ids of every published envelope, in publish order.
    pub fn published_ids(&self) -> Vec<String> {
        self.published_envelopes()
            .into_iter()
            .map(|e| e.id)
            .collect()
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widget_fixture() {
        let doc = widget_document();
        assert_eq!(doc["_id"], "abc123");
        assert_eq!(fixed_time().to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[test]
    fn pipeline_forwards_inserts() {
        let pipeline = TestPipeline::new();
        pipeline.insert(json!({"_id": "a"}));
        pipeline.insert(json!({"_id": "b"}));

        let stats = pipeline
            .run_until_published(pipeline.forwarder(), 2)
            .unwrap();
        assert_eq!(stats.events_published, 2);
        assert_eq!(pipeline.published_ids(), vec!["a", "b"]);
    }

    #[test]
    fn pipeline_stops_on_early_failure() {
        let pipeline = TestPipeline::new();
        pipeline.insert(json!({"no_id": true}));
        let err = pipeline
            .run_until_published(pipeline.forwarder(), 1)
            .unwrap_err();
        assert_eq!(err.kind_name(), "schema_violation");
        assert!(pipeline.published_ids().is_empty());
    }
}
