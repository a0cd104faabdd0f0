//! Change feed subscription and the resuming reader.
//!
//! A [`ChangeStreamSource`] is the database capability: it opens a
//! subscription from an optional resume token and hands back a
//! [`ChangeCursor`]. The [`ChangeFeedReader`] layers the pipeline's
//! guarantees on top:
//!
//! - the insert-only filter is sent to the source with every subscribe
//! - transient failures reopen the subscription after the last delivered
//!   event, with bounded exponential backoff
//! - an expired resume token or an invalidate event ends the sequence
//! - a shutdown request ends the sequence cleanly at the next wait

use crate::config::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::event::{ChangeEvent, OperationType, ResumeToken, StreamId};
use crate::shutdown::ShutdownHandle;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The set of operations a subscription asks the source for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    operations: Vec<OperationType>,
}

impl FeedFilter {
    /// A filter matching inserts only.
    pub fn inserts_only() -> Self {
        Self {
            operations: vec![OperationType::Insert],
        }
    }

    /// Operations matched by this filter.
    pub fn operations(&self) -> &[OperationType] {
        &self.operations
    }

    /// Returns true if events of `operation` pass the filter.
    pub fn allows(&self, operation: &OperationType) -> bool {
        self.operations.contains(operation)
    }
}

impl Default for FeedFilter {
    fn default() -> Self {
        Self::inserts_only()
    }
}

/// A database change feed.
///
/// This trait abstracts the database driver, allowing for different
/// implementations (a real change stream, a tailed file, in-memory for
/// testing).
pub trait ChangeStreamSource: Send + Sync {
    /// The cursor type returned by [`subscribe`](Self::subscribe).
    type Cursor: ChangeCursor;

    /// Opens a subscription.
    ///
    /// With a resume token the cursor starts strictly after that event.
    /// The filter must be applied by the source, not by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::ResumeTokenExpired`] if the token has fallen out
    /// of the source's history, or [`FeedError::Timeout`] /
    /// [`FeedError::Unavailable`] if the source cannot be reached within
    /// `timeout`. The reader passes [`FeedConfig::open_timeout`] and never
    /// interrupts a call itself.
    fn subscribe(
        &self,
        filter: &FeedFilter,
        resume_after: Option<&ResumeToken>,
        timeout: Duration,
    ) -> FeedResult<Self::Cursor>;
}

/// An open subscription.
pub trait ChangeCursor: Send {
    /// Waits up to `wait` for the next event.
    ///
    /// Returns `Ok(None)` when no event arrived in time.
    fn next_event(&mut self, wait: Duration) -> FeedResult<Option<ChangeEvent>>;

    /// Releases the subscription.
    fn close(&mut self) {}
}

/// Reads a change feed as a lazy, resumable sequence of insert events.
pub struct ChangeFeedReader<'a, S: ChangeStreamSource> {
    source: &'a S,
    config: FeedConfig,
    stream: StreamId,
    shutdown: ShutdownHandle,
    cursor: Option<S::Cursor>,
    last_token: Option<ResumeToken>,
    reconnects: u64,
    failures: u32,
    finished: bool,
}

impl<'a, S: ChangeStreamSource> ChangeFeedReader<'a, S> {
    /// Opens the feed, resuming after `resume_from` if given.
    ///
    /// # Errors
    ///
    /// Fails with [`FeedError::Exhausted`] when every subscribe attempt
    /// failed transiently, or with the source's non-retryable error.
    ///
    /// The retry budget counts consecutive transient failures of subscribes
    /// and reads alike; it is restored only once the cursor delivers an
    /// event or completes an idle poll.
    pub fn open(
        source: &'a S,
        config: FeedConfig,
        stream: StreamId,
        resume_from: Option<ResumeToken>,
        shutdown: ShutdownHandle,
    ) -> FeedResult<Self> {
        let mut reader = Self {
            source,
            config,
            stream,
            shutdown,
            cursor: None,
            last_token: resume_from,
            reconnects: 0,
            failures: 0,
            finished: false,
        };
        info!(
            stream = %reader.stream,
            resume_token = %display_position(reader.last_token.as_ref()),
            "opening change stream"
        );
        if let Err(e) = reader.connect() {
            reader.finished = true;
            return Err(e);
        }
        Ok(reader)
    }

    /// Returns the next insert event.
    ///
    /// Blocks until an event arrives. Returns `Ok(None)` once shutdown is
    /// requested or after the sequence has ended.
    pub fn next_event(&mut self) -> FeedResult<Option<ChangeEvent>> {
        loop {
            if self.finished || self.shutdown.is_requested() {
                self.close();
                return Ok(None);
            }

            let Some(cursor) = self.cursor.as_mut() else {
                match self.connect() {
                    Ok(true) => {
                        self.reconnects += 1;
                        info!(
                            stream = %self.stream,
                            resume_token = %display_position(self.last_token.as_ref()),
                            reconnects = self.reconnects,
                            "change stream reopened"
                        );
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.finished = true;
                        return Err(e);
                    }
                }
                continue;
            };

            match cursor.next_event(self.config.poll_interval) {
                Ok(Some(event)) => {
                    self.failures = 0;
                    if event.operation == OperationType::Invalidate {
                        self.close();
                        self.finished = true;
                        return Err(FeedError::Invalidated {
                            message: format!("invalidate event at {}", event.resume_token),
                        });
                    }
                    self.last_token = Some(event.resume_token.clone());
                    if !self.config.filter.allows(&event.operation) {
                        warn!(
                            stream = %self.stream,
                            operation = %event.operation,
                            resume_token = %event.resume_token,
                            "dropping event outside the subscription filter"
                        );
                        continue;
                    }
                    return Ok(Some(event));
                }
                Ok(None) => self.failures = 0,
                Err(e) if e.is_retryable() => {
                    self.failures += 1;
                    warn!(
                        stream = %self.stream,
                        resume_token = %display_position(self.last_token.as_ref()),
                        attempt = self.failures,
                        max_attempts = self.config.retry.max_attempts,
                        error_kind = "feed_unavailable",
                        error = %e,
                        "change stream interrupted, reopening"
                    );
                    if let Some(mut cursor) = self.cursor.take() {
                        cursor.close();
                    }
                    if self.failures >= self.config.retry.max_attempts {
                        self.close();
                        return Err(self.exhausted(e));
                    }
                }
                Err(e) => {
                    self.close();
                    self.finished = true;
                    return Err(e);
                }
            }
        }
    }

    /// The token of the last event delivered (or the starting position).
    pub fn position(&self) -> Option<&ResumeToken> {
        self.last_token.as_ref()
    }

    /// Number of times the subscription was reopened.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Closes the subscription. No further events are yielded.
    pub fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
            debug!(stream = %self.stream, "change stream closed");
        }
        self.finished = true;
    }

    /// Subscribes with retry, continuing the backoff of any consecutive
    /// failures before it. Returns `Ok(false)` if shutdown interrupted the
    /// backoff.
    fn connect(&mut self) -> FeedResult<bool> {
        loop {
            if self.failures > 0 {
                let delay = self.config.retry.delay_for_attempt(self.failures);
                if self.shutdown.wait_timeout(delay) {
                    return Ok(false);
                }
            }

            match self.source.subscribe(
                &self.config.filter,
                self.last_token.as_ref(),
                self.config.open_timeout,
            ) {
                Ok(cursor) => {
                    self.cursor = Some(cursor);
                    return Ok(true);
                }
                Err(e) if e.is_retryable() => {
                    self.failures += 1;
                    warn!(
                        stream = %self.stream,
                        resume_token = %display_position(self.last_token.as_ref()),
                        attempt = self.failures,
                        max_attempts = self.config.retry.max_attempts,
                        error_kind = "feed_unavailable",
                        error = %e,
                        "subscribe failed"
                    );
                    if self.failures >= self.config.retry.max_attempts {
                        return Err(self.exhausted(e));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn exhausted(&self, last: FeedError) -> FeedError {
        FeedError::Exhausted {
            attempts: self.failures,
            last: Box::new(last),
        }
    }
}

impl<S: ChangeStreamSource> Iterator for ChangeFeedReader<'_, S> {
    type Item = FeedResult<ChangeEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

pub(crate) fn display_position(token: Option<&ResumeToken>) -> String {
    token.map_or_else(|| "<start>".to_string(), ResumeToken::to_string)
}

/// An in-memory change feed for testing.
///
/// Events are kept in an append-only history. Subscriptions without a token
/// start at the oldest retained event. Faults can be injected into
/// subscribe calls and into reads at a given history position.
#[derive(Debug, Clone, Default)]
pub struct MemoryChangeStream {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MemoryState>,
    condvar: Condvar,
}

#[derive(Debug)]
struct MemoryState {
    events: Vec<ChangeEvent>,
    first_retained: usize,
    next_sequence: u64,
    honor_filter: bool,
    subscribe_faults: VecDeque<FeedError>,
    read_faults: Vec<(usize, FeedError)>,
    subscriptions: Vec<Option<ResumeToken>>,
    filters: Vec<FeedFilter>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            first_retained: 0,
            next_sequence: 1,
            honor_filter: true,
            subscribe_faults: VecDeque::new(),
            read_faults: Vec::new(),
            subscriptions: Vec::new(),
            filters: Vec::new(),
        }
    }
}

impl MemoryChangeStream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token for the next sequence number.
    pub fn next_token(&self) -> ResumeToken {
        let mut state = self.shared.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        ResumeToken::from_bytes(sequence.to_be_bytes().to_vec())
    }

    /// Appends an event and wakes waiting cursors.
    pub fn emit(&self, event: ChangeEvent) {
        self.shared.state.lock().events.push(event);
        self.shared.condvar.notify_all();
    }

    /// Appends several events.
    pub fn emit_batch(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        self.shared.state.lock().events.extend(events);
        self.shared.condvar.notify_all();
    }

    /// Drops the `count` oldest retained events from history.
    ///
    /// Cursors and tokens pointing into the dropped range become expired.
    pub fn truncate_history(&self, count: usize) {
        let mut state = self.shared.state.lock();
        state.first_retained = (state.first_retained + count).min(state.events.len());
        drop(state);
        self.shared.condvar.notify_all();
    }

    /// When false, the stream ignores the subscription filter and delivers
    /// every operation.
    pub fn set_honor_filter(&self, honor: bool) {
        self.shared.state.lock().honor_filter = honor;
    }

    /// Makes the next subscribe calls fail with the given errors, in order.
    pub fn fail_subscribes(&self, errors: impl IntoIterator<Item = FeedError>) {
        self.shared.state.lock().subscribe_faults.extend(errors);
    }

    /// Makes a read fail once when a cursor reaches history index `position`.
    pub fn fail_read_at(&self, position: usize, error: FeedError) {
        self.shared.state.lock().read_faults.push((position, error));
        self.shared.condvar.notify_all();
    }

    /// Number of events ever emitted.
    pub fn len(&self) -> usize {
        self.shared.state.lock().events.len()
    }

    /// Returns true if no event was ever emitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resume tokens passed to every subscribe call, in order.
    pub fn subscriptions(&self) -> Vec<Option<ResumeToken>> {
        self.shared.state.lock().subscriptions.clone()
    }

    /// Filters passed to every subscribe call, in order.
    pub fn filters(&self) -> Vec<FeedFilter> {
        self.shared.state.lock().filters.clone()
    }
}

impl ChangeStreamSource for MemoryChangeStream {
    type Cursor = MemoryCursor;

    fn subscribe(
        &self,
        filter: &FeedFilter,
        resume_after: Option<&ResumeToken>,
        _timeout: Duration,
    ) -> FeedResult<MemoryCursor> {
        let mut state = self.shared.state.lock();
        state.subscriptions.push(resume_after.cloned());
        state.filters.push(filter.clone());

        if let Some(error) = state.subscribe_faults.pop_front() {
            return Err(error);
        }

        let position = match resume_after {
            None => state.first_retained,
            Some(token) => {
                let retained = &state.events[state.first_retained..];
                match retained.iter().position(|e| &e.resume_token == token) {
                    Some(index) => state.first_retained + index + 1,
                    None => {
                        return Err(FeedError::expired(format!(
                            "token {token} is not in the retained history"
                        )))
                    }
                }
            }
        };

        Ok(MemoryCursor {
            shared: Arc::clone(&self.shared),
            filter: filter.clone(),
            position,
        })
    }
}

/// Cursor over a [`MemoryChangeStream`].
#[derive(Debug)]
pub struct MemoryCursor {
    shared: Arc<Shared>,
    filter: FeedFilter,
    position: usize,
}

impl ChangeCursor for MemoryCursor {
    fn next_event(&mut self, wait: Duration) -> FeedResult<Option<ChangeEvent>> {
        let deadline = Instant::now() + wait;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(index) = state
                .read_faults
                .iter()
                .position(|(at, _)| *at == self.position)
            {
                let (_, error) = state.read_faults.remove(index);
                return Err(error);
            }
            if self.position < state.first_retained {
                return Err(FeedError::expired("cursor position was truncated"));
            }
            while self.position < state.events.len() {
                let event = &state.events[self.position];
                self.position += 1;
                if !state.honor_filter
                    || self.filter.allows(&event.operation)
                    || event.operation == OperationType::Invalidate
                {
                    return Ok(Some(event.clone()));
                }
            }
            if self
                .shared
                .condvar
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::event::Document;
    use chrono::Utc;
    use serde_json::json;
    use std::thread;

    fn fast_config() -> FeedConfig {
        FeedConfig::new()
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            )
            .with_poll_interval(Duration::from_millis(10))
    }

    fn stream_id() -> StreamId {
        StreamId::new("shop", "orders")
    }

    fn document(n: u64) -> Document {
        match json!({ "_id": n }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn insert(feed: &MemoryChangeStream, n: u64) -> ResumeToken {
        let token = feed.next_token();
        feed.emit(ChangeEvent::insert(token.clone(), document(n), Utc::now()));
        token
    }

    fn other(feed: &MemoryChangeStream, operation: OperationType) -> ResumeToken {
        let token = feed.next_token();
        feed.emit(ChangeEvent::without_document(
            operation,
            token.clone(),
            Utc::now(),
        ));
        token
    }

    fn ids(events: &[ChangeEvent]) -> Vec<u64> {
        events
            .iter()
            .map(|e| e.full_document.as_ref().unwrap()["_id"].as_u64().unwrap())
            .collect()
    }

    fn take(reader: &mut ChangeFeedReader<'_, MemoryChangeStream>, n: usize) -> Vec<ChangeEvent> {
        (0..n).map(|_| reader.next_event().unwrap().unwrap()).collect()
    }

    #[test]
    fn delivers_in_feed_order() {
        let feed = MemoryChangeStream::new();
        for n in 1..=5 {
            insert(&feed, n);
        }
        let mut reader = ChangeFeedReader::open(
            &feed,
            fast_config(),
            stream_id(),
            None,
            ShutdownHandle::new(),
        )
        .unwrap();
        assert_eq!(ids(&take(&mut reader, 5)), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn filter_is_sent_to_source() {
        let feed = MemoryChangeStream::new();
        let _reader = ChangeFeedReader::open(
            &feed,
            fast_config(),
            stream_id(),
            None,
            ShutdownHandle::new(),
        )
        .unwrap();
        assert_eq!(feed.filters(), vec![FeedFilter::inserts_only()]);
    }

    #[test]
    fn non_inserts_never_yielded_even_if_source_ignores_filter() {
        let feed = MemoryChangeStream::new();
        feed.set_honor_filter(false);
        insert(&feed, 1);
        other(&feed, OperationType::Update);
        other(&feed, OperationType::Delete);
        other(&feed, OperationType::Replace);
        insert(&feed, 2);

        let shutdown = ShutdownHandle::new();
        let mut reader =
            ChangeFeedReader::open(&feed, fast_config(), stream_id(), None, shutdown.clone())
                .unwrap();
        let events = take(&mut reader, 2);
        assert!(events.iter().all(|e| e.operation.is_insert()));
        assert_eq!(ids(&events), vec![1, 2]);
    }

    #[test]
    fn resumes_after_token() {
        let feed = MemoryChangeStream::new();
        insert(&feed, 1);
        let second = insert(&feed, 2);
        insert(&feed, 3);

        let mut reader = ChangeFeedReader::open(
            &feed,
            fast_config(),
            stream_id(),
            Some(second.clone()),
            ShutdownHandle::new(),
        )
        .unwrap();
        assert_eq!(ids(&take(&mut reader, 1)), vec![3]);
        assert_eq!(feed.subscriptions(), vec![Some(second)]);
    }

    #[test]
    fn transient_read_error_reopens_from_last_token() {
        let feed = MemoryChangeStream::new();
        for n in 1..=4 {
            insert(&feed, n);
        }
        feed.fail_read_at(2, FeedError::unavailable_retryable("connection reset"));

        let mut reader = ChangeFeedReader::open(
            &feed,
            fast_config(),
            stream_id(),
            None,
            ShutdownHandle::new(),
        )
        .unwrap();
        let events = take(&mut reader, 4);
        assert_eq!(ids(&events), vec![1, 2, 3, 4]);
        assert_eq!(reader.reconnects(), 1);

        let subscriptions = feed.subscriptions();
        assert_eq!(subscriptions.len(), 2);
        assert_eq!(subscriptions[1], Some(events[1].resume_token.clone()));
    }

    #[test]
    fn subscribe_retries_then_succeeds() {
        let feed = MemoryChangeStream::new();
        insert(&feed, 1);
        feed.fail_subscribes([
            FeedError::unavailable_retryable("server selection timeout"),
            FeedError::Timeout {
                after: Duration::from_millis(5),
            },
        ]);
        let mut reader = ChangeFeedReader::open(
            &feed,
            fast_config(),
            stream_id(),
            None,
            ShutdownHandle::new(),
        )
        .unwrap();
        assert_eq!(ids(&take(&mut reader, 1)), vec![1]);
        assert_eq!(feed.subscriptions().len(), 3);
    }

    #[test]
    fn subscribe_exhaustion_fails() {
        let feed = MemoryChangeStream::new();
        feed.fail_subscribes((0..3).map(|_| FeedError::unavailable_retryable("down")));
        let result = ChangeFeedReader::open(
            &feed,
            fast_config(),
            stream_id(),
            None,
            ShutdownHandle::new(),
        );
        assert!(matches!(
            result,
            Err(FeedError::Exhausted { attempts: 3, .. })
        ));
    }

    #[test]
    fn expired_token_is_not_retried() {
        let feed = MemoryChangeStream::new();
        let first = insert(&feed, 1);
        insert(&feed, 2);
        feed.truncate_history(2);

        let result = ChangeFeedReader::open(
            &feed,
            fast_config(),
            stream_id(),
            Some(first),
            ShutdownHandle::new(),
        );
        assert!(matches!(result, Err(FeedError::ResumeTokenExpired { .. })));
        assert_eq!(feed.subscriptions().len(), 1);
    }

    #[test]
    fn invalidate_ends_stream() {
        let feed = MemoryChangeStream::new();
        insert(&feed, 1);
        other(&feed, OperationType::Invalidate);
        insert(&feed, 2);

        let mut reader = ChangeFeedReader::open(
            &feed,
            fast_config(),
            stream_id(),
            None,
            ShutdownHandle::new(),
        )
        .unwrap();
        assert_eq!(ids(&take(&mut reader, 1)), vec![1]);
        assert!(matches!(
            reader.next_event(),
            Err(FeedError::Invalidated { .. })
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn shutdown_ends_sequence_while_waiting() {
        let feed = MemoryChangeStream::new();
        let shutdown = ShutdownHandle::new();
        let remote = shutdown.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.request();
        });

        let mut reader =
            ChangeFeedReader::open(&feed, fast_config(), stream_id(), None, shutdown).unwrap();
        assert!(reader.next_event().unwrap().is_none());
        assert!(reader.next().is_none());
        stopper.join().unwrap();
    }

    #[test]
    fn events_emitted_while_waiting_are_delivered() {
        let feed = MemoryChangeStream::new();
        let producer = feed.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            insert(&producer, 9);
        });
        let mut reader = ChangeFeedReader::open(
            &feed,
            fast_config(),
            stream_id(),
            None,
            ShutdownHandle::new(),
        )
        .unwrap();
        assert_eq!(ids(&take(&mut reader, 1)), vec![9]);
        handle.join().unwrap();
    }

    /// Accepts every subscription, then fails every read.
    #[derive(Default)]
    struct FlakySource {
        subscribes: std::sync::atomic::AtomicUsize,
    }

    struct FlakyCursor;

    impl ChangeCursor for FlakyCursor {
        fn next_event(&mut self, _wait: Duration) -> FeedResult<Option<ChangeEvent>> {
            Err(FeedError::unavailable_retryable("connection reset"))
        }
    }

    impl ChangeStreamSource for FlakySource {
        type Cursor = FlakyCursor;

        fn subscribe(
            &self,
            _filter: &FeedFilter,
            _resume_after: Option<&ResumeToken>,
            _timeout: Duration,
        ) -> FeedResult<FlakyCursor> {
            self.subscribes
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(FlakyCursor)
        }
    }

    #[test]
    fn failing_reads_exhaust_retries_with_backoff() {
        let source = FlakySource::default();
        let config = FeedConfig::new()
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(20))
                    .with_jitter(false),
            )
            .with_poll_interval(Duration::from_millis(10));
        let start = Instant::now();
        let mut reader =
            ChangeFeedReader::open(&source, config, stream_id(), None, ShutdownHandle::new())
                .unwrap();

        let err = reader.next_event().unwrap_err();
        assert!(matches!(err, FeedError::Exhausted { attempts: 3, .. }));
        assert!(!err.is_retryable());
        assert_eq!(
            source
                .subscribes
                .load(std::sync::atomic::Ordering::SeqCst),
            3
        );
        // Reopens waited 20ms and then 40ms.
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert!(reader.next_event().unwrap().is_none());
    }

    #[test]
    fn delivered_event_restores_retry_budget() {
        let feed = MemoryChangeStream::new();
        for n in 1..=4 {
            insert(&feed, n);
        }
        feed.fail_read_at(1, FeedError::unavailable_retryable("connection reset"));
        feed.fail_read_at(3, FeedError::unavailable_retryable("connection reset"));
        let config = FeedConfig::new()
            .with_retry(
                RetryConfig::new(2)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            )
            .with_poll_interval(Duration::from_millis(10));

        let mut reader =
            ChangeFeedReader::open(&feed, config, stream_id(), None, ShutdownHandle::new())
                .unwrap();
        assert_eq!(ids(&take(&mut reader, 4)), vec![1, 2, 3, 4]);
        assert_eq!(reader.reconnects(), 2);
    }
}
