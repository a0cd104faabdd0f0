//! Running forwarders on their own threads.
//!
//! Each stream gets a dedicated thread with its own reader, publisher and
//! tracker. Streams share nothing mutable, so one stream failing leaves the
//! others running.

use crate::error::{ForwardError, ForwardResult};
use crate::event::StreamId;
use crate::feed::ChangeStreamSource;
use crate::forwarder::{Forwarder, ForwarderMonitor};
use crate::publish::MessageBus;
use crate::shutdown::ShutdownHandle;
use crate::stats::ForwarderStats;
use crate::tracker::ResumeTracker;
use std::io;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// A forwarder running on its own thread.
pub struct ForwarderHandle {
    stream: StreamId,
    shutdown: ShutdownHandle,
    monitor: ForwarderMonitor,
    thread: JoinHandle<ForwardResult<ForwarderStats>>,
}

impl ForwarderHandle {
    /// The stream being forwarded.
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// A view of the forwarder's state and statistics.
    pub fn monitor(&self) -> &ForwarderMonitor {
        &self.monitor
    }

    /// Requests a graceful drain. Does not wait.
    pub fn shutdown(&self) {
        self.shutdown.request();
    }

    /// Returns true once the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the forwarder to stop and returns its outcome.
    pub fn join(self) -> ForwardResult<ForwarderStats> {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => {
                warn!(stream = %self.stream, "forwarder thread panicked");
                Err(ForwardError::Panicked {
                    stream: self.stream.to_string(),
                })
            }
        }
    }
}

impl<S, B, T> Forwarder<S, B, T>
where
    S: ChangeStreamSource + 'static,
    B: MessageBus + 'static,
    T: ResumeTracker + 'static,
{
    /// Moves the forwarder onto a new thread and starts it.
    pub fn spawn(mut self) -> io::Result<ForwarderHandle> {
        let stream = self.stream().clone();
        let shutdown = self.shutdown_handle();
        let monitor = self.monitor();
        let thread = thread::Builder::new()
            .name(format!("feedrelay-{stream}"))
            .spawn(move || self.run())?;
        Ok(ForwarderHandle {
            stream,
            shutdown,
            monitor,
            thread,
        })
    }
}

/// The final outcome of one stream in a [`StreamGroup`].
#[derive(Debug)]
pub struct StreamOutcome {
    /// The stream.
    pub stream: StreamId,
    /// How it ended.
    pub result: ForwardResult<ForwarderStats>,
}

/// A set of independent forwarders.
#[derive(Default)]
pub struct StreamGroup {
    handles: Vec<ForwarderHandle>,
}

impl StreamGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a forwarder into the group.
    pub fn spawn<S, B, T>(&mut self, forwarder: Forwarder<S, B, T>) -> io::Result<()>
    where
        S: ChangeStreamSource + 'static,
        B: MessageBus + 'static,
        T: ResumeTracker + 'static,
    {
        self.handles.push(forwarder.spawn()?);
        Ok(())
    }

    /// Number of forwarders.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if the group is empty.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Monitors for every forwarder, in spawn order.
    pub fn monitors(&self) -> Vec<ForwarderMonitor> {
        self.handles.iter().map(|h| h.monitor().clone()).collect()
    }

    /// Returns true once every forwarder has exited.
    pub fn all_finished(&self) -> bool {
        self.handles.iter().all(ForwarderHandle::is_finished)
    }

    /// Requests a graceful drain of every forwarder.
    pub fn shutdown_all(&self) {
        for handle in &self.handles {
            handle.shutdown();
        }
    }

    /// Waits for every forwarder and returns their outcomes in spawn order.
    pub fn join_all(self) -> Vec<StreamOutcome> {
        self.handles
            .into_iter()
            .map(|handle| StreamOutcome {
                stream: handle.stream().clone(),
                result: handle.join(),
            })
            .collect()
    }
}
