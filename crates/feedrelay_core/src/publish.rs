//! Message bus abstraction and the retrying publisher.

use crate::config::PublishConfig;
use crate::error::{BusError, BusResult, ErrorKind};
use crate::shutdown::ShutdownHandle;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A message bus client.
///
/// One client handle is created per process and shared by every publisher;
/// implementations must be safe to call from several threads.
pub trait MessageBus: Send + Sync {
    /// Publishes one message and returns the broker-assigned id.
    ///
    /// The call must return within `timeout`, failing with
    /// [`BusError::Timeout`] when the broker has not acknowledged by then.
    /// The [`Publisher`] passes its per-attempt timeout here and never
    /// interrupts a call itself.
    ///
    /// # Errors
    ///
    /// Transient failures ([`BusError::Transient`], [`BusError::Timeout`])
    /// are retried by the [`Publisher`]; every other error is permanent.
    fn publish(&self, topic: &str, payload: &Bytes, timeout: Duration) -> BusResult<String>;

    /// Flushes and releases the client.
    fn close(&self) -> BusResult<()> {
        Ok(())
    }
}

impl<B: MessageBus + ?Sized> MessageBus for Arc<B> {
    fn publish(&self, topic: &str, payload: &Bytes, timeout: Duration) -> BusResult<String> {
        (**self).publish(topic, payload, timeout)
    }

    fn close(&self) -> BusResult<()> {
        (**self).close()
    }
}

/// Outcome of one [`Publisher::publish`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    /// Whether the bus accepted the message.
    pub success: bool,
    /// Broker-assigned message id on success.
    pub message_id: Option<String>,
    /// Failure kind on failure.
    pub error: Option<ErrorKind>,
    /// Number of attempts made.
    pub attempts: u32,
    /// The last bus error, if the publish failed.
    pub last_error: Option<BusError>,
}

impl PublishResult {
    fn accepted(message_id: String, attempts: u32) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
            attempts,
            last_error: None,
        }
    }

    fn failed(error: BusError, attempts: u32) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(ErrorKind::PublishRejected),
            attempts,
            last_error: Some(error),
        }
    }

    /// Number of retries, i.e. attempts after the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Returns true if retries were abandoned for a drain deadline.
    pub fn deadline_exceeded(&self) -> bool {
        matches!(self.last_error, Some(BusError::DeadlineExceeded { .. }))
    }
}

/// Publishes payloads to one topic with bounded retry and backoff.
pub struct Publisher<B: MessageBus> {
    bus: B,
    config: PublishConfig,
}

impl<B: MessageBus> Publisher<B> {
    /// Creates a publisher.
    pub fn new(bus: B, config: PublishConfig) -> Self {
        Self { bus, config }
    }

    /// The target topic.
    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// The underlying bus client.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Publishes a payload, retrying transient failures.
    pub fn publish(&self, payload: &Bytes) -> PublishResult {
        self.publish_inner(payload, |delay| {
            std::thread::sleep(delay);
            true
        })
    }

    /// Publishes a payload while honoring a drain deadline.
    ///
    /// Backoff sleeps wake when shutdown is requested. Once it is, further
    /// attempts are made only while they can start before
    /// `requested_at + drain_timeout`; otherwise the result carries
    /// [`BusError::DeadlineExceeded`].
    pub fn publish_draining(
        &self,
        payload: &Bytes,
        shutdown: &ShutdownHandle,
        drain_timeout: Duration,
    ) -> PublishResult {
        self.publish_inner(payload, |delay| {
            let wake_at = Instant::now() + delay;
            loop {
                if let Some(deadline) = shutdown.drain_deadline(drain_timeout) {
                    if wake_at > deadline {
                        return false;
                    }
                    std::thread::sleep(wake_at.saturating_duration_since(Instant::now()));
                    return true;
                }
                let now = Instant::now();
                if now >= wake_at {
                    return true;
                }
                shutdown.wait_timeout(wake_at - now);
            }
        })
    }

    fn publish_inner(
        &self,
        payload: &Bytes,
        mut pause: impl FnMut(Duration) -> bool,
    ) -> PublishResult {
        let retry = &self.config.retry;
        let mut attempts = 0;
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 && !pause(retry.delay_for_attempt(attempt)) {
                warn!(
                    topic = %self.config.topic,
                    attempt,
                    "abandoning publish retries at drain deadline"
                );
                return PublishResult::failed(BusError::DeadlineExceeded { attempts }, attempts);
            }

            attempts = attempt + 1;
            match self
                .bus
                .publish(&self.config.topic, payload, self.config.timeout)
            {
                Ok(message_id) => {
                    if attempts > 1 {
                        info!(
                            topic = %self.config.topic,
                            attempt = attempts,
                            message_id = %message_id,
                            "publish succeeded after retry"
                        );
                    } else {
                        debug!(
                            topic = %self.config.topic,
                            attempt = attempts,
                            message_id = %message_id,
                            "publish succeeded"
                        );
                    }
                    return PublishResult::accepted(message_id, attempts);
                }
                Err(e) if e.is_retryable() && attempts < retry.max_attempts => {
                    warn!(
                        topic = %self.config.topic,
                        attempt = attempts,
                        max_attempts = retry.max_attempts,
                        error_kind = "publish_transient",
                        error = %e,
                        "publish attempt failed, retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    warn!(
                        topic = %self.config.topic,
                        attempt = attempts,
                        max_attempts = retry.max_attempts,
                        retryable = e.is_retryable(),
                        error_kind = "publish_rejected",
                        error = %e,
                        "publish failed"
                    );
                    return PublishResult::failed(e, attempts);
                }
            }
        }

        PublishResult::failed(
            last_error.unwrap_or_else(|| BusError::rejected("no publish attempts made")),
            attempts,
        )
    }
}

/// A message accepted by a [`MemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Message payload.
    pub payload: Bytes,
    /// Assigned message id.
    pub message_id: String,
}

/// An in-memory message bus for testing.
///
/// Failures are scripted: each queued error is returned by one publish call,
/// in order, before publishes start succeeding again. Acknowledgement
/// latencies can be scripted the same way; a latency longer than the call's
/// timeout ends that call with [`BusError::Timeout`].
#[derive(Debug, Default)]
pub struct MemoryBus {
    state: Mutex<BusState>,
}

#[derive(Debug, Default)]
struct BusState {
    published: Vec<PublishedMessage>,
    failures: VecDeque<BusError>,
    latencies: VecDeque<Duration>,
    attempts: u64,
    next_id: u64,
    closed: bool,
}

impl MemoryBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues errors for the next publish calls.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = BusError>) {
        self.state.lock().failures.extend(errors);
    }

    /// Queues acknowledgement latencies for the next publish calls.
    pub fn delay_next(&self, latencies: impl IntoIterator<Item = Duration>) {
        self.state.lock().latencies.extend(latencies);
    }

    /// Messages accepted so far, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    /// Total publish calls, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }

    /// Returns true once [`MessageBus::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, topic: &str, payload: &Bytes, timeout: Duration) -> BusResult<String> {
        let latency = {
            let mut state = self.state.lock();
            state.attempts += 1;
            if state.closed {
                return Err(BusError::rejected("bus client is closed"));
            }
            if let Some(error) = state.failures.pop_front() {
                return Err(error);
            }
            state.latencies.pop_front()
        };
        if let Some(latency) = latency {
            if latency > timeout {
                std::thread::sleep(timeout);
                return Err(BusError::Timeout { after: timeout });
            }
            std::thread::sleep(latency);
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let message_id = format!("mem-{}", state.next_id);
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            message_id: message_id.clone(),
        });
        Ok(message_id)
    }

    fn close(&self) -> BusResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
