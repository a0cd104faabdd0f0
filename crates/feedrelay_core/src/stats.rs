//! Forwarder statistics.

use crate::event::ResumeToken;
use std::time::Instant;

/// Counters and positions for one forwarder.
#[derive(Debug, Clone, Default)]
pub struct ForwarderStats {
    /// Insert events received from the feed.
    pub events_seen: u64,
    /// Events accepted by the bus and saved.
    pub events_published: u64,
    /// Events dropped under the `skip` schema violation policy.
    pub events_skipped: u64,
    /// Publish attempts after the first, summed over all events.
    pub publish_retries: u64,
    /// Times the change stream was reopened.
    pub feed_reconnects: u64,
    /// The last durably saved position.
    pub last_saved: Option<ResumeToken>,
    /// The last message id returned by the bus.
    pub last_message_id: Option<String>,
    /// When the forwarder entered `Running`.
    pub started_at: Option<Instant>,
    /// When the last event was saved.
    pub last_saved_at: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}
