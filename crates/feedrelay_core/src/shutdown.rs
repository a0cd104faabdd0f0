//! Cooperative shutdown signalling.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cloneable handle used to request a graceful drain.
///
/// Any thread may call [`request`](Self::request); blocking waits inside the
/// pipeline wake up immediately when it does.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    requested_at: Mutex<Option<Instant>>,
    condvar: Condvar,
}

impl ShutdownHandle {
    /// Creates a handle with no shutdown requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Repeated calls keep the first request time.
    pub fn request(&self) {
        let mut requested_at = self.inner.requested_at.lock();
        if requested_at.is_none() {
            *requested_at = Some(Instant::now());
        }
        self.inner.condvar.notify_all();
    }

    /// Returns true once shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.inner.requested_at.lock().is_some()
    }

    /// When shutdown was first requested.
    pub fn requested_at(&self) -> Option<Instant> {
        *self.inner.requested_at.lock()
    }

    /// The instant by which a drain must complete, if shutdown was requested.
    pub fn drain_deadline(&self, drain_timeout: Duration) -> Option<Instant> {
        self.requested_at().map(|at| at + drain_timeout)
    }

    /// Sleeps for up to `timeout`, returning early if shutdown is requested.
    ///
    /// Returns true if shutdown has been requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut requested_at = self.inner.requested_at.lock();
        while requested_at.is_none() {
            if self
                .inner
                .condvar
                .wait_until(&mut requested_at, deadline)
                .timed_out()
            {
                break;
            }
        }
        requested_at.is_some()
    }
}
