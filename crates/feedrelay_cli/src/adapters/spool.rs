//! A message bus that spools each message to a file.
//!
//! Messages land in `<dir>/<topic>/` as `<sequence>-<message id>.avro`. The
//! sequence is a zero-padded counter that keeps directory order equal to
//! publish order; the message id is a UUID v4. Payloads are written under a
//! temporary name and renamed, so a consumer never sees a partial file.

use bytes::Bytes;
use feedrelay_core::{BusError, BusResult, MessageBus};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Largest accepted payload, matching common broker limits.
pub const DEFAULT_MAX_PAYLOAD: usize = 10 * 1024 * 1024;

/// File extension of spooled payloads.
pub const PAYLOAD_EXTENSION: &str = "avro";

/// A directory-backed message bus.
///
/// Writes go to the local filesystem and are not bounded by the publish
/// timeout; a stalled disk blocks the calling forwarder.
#[derive(Debug)]
pub struct SpoolBus {
    dir: PathBuf,
    max_payload: usize,
    sequence: AtomicU64,
    closed: AtomicBool,
}

impl SpoolBus {
    /// Opens a spool rooted at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let next = last_sequence(&dir)? + 1;
        Ok(Self {
            dir,
            max_payload: DEFAULT_MAX_PAYLOAD,
            sequence: AtomicU64::new(next),
            closed: AtomicBool::new(false),
        })
    }

    /// Sets the payload size limit.
    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    /// Creates a topic directory. Publishing to a topic that was never
    /// created fails with [`BusError::TopicNotFound`].
    pub fn create_topic(&self, topic: &str) -> io::Result<()> {
        fs::create_dir_all(self.topic_dir(topic))
    }

    /// Spooled payload files of `topic`, in publish order.
    #[cfg(test)]
    pub fn messages(&self, topic: &str) -> io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(self.topic_dir(topic))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_payload(path))
            .collect();
        files.sort();
        Ok(files)
    }

    fn topic_dir(&self, topic: &str) -> PathBuf {
        self.dir.join(topic)
    }
}

impl MessageBus for SpoolBus {
    fn publish(&self, topic: &str, payload: &Bytes, _timeout: Duration) -> BusResult<String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::rejected("spool bus is closed"));
        }
        if payload.len() > self.max_payload {
            return Err(BusError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        let topic_dir = self.topic_dir(topic);
        if !topic_dir.is_dir() {
            return Err(BusError::TopicNotFound {
                topic: topic.to_string(),
            });
        }

        let message_id = Uuid::new_v4().to_string();
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel);
        let name = format!("{sequence:020}-{message_id}");
        let temp = topic_dir.join(format!("{name}.tmp"));
        let path = topic_dir.join(format!("{name}.{PAYLOAD_EXTENSION}"));

        write_payload(&temp, &path, payload).map_err(|e| {
            let _ = fs::remove_file(&temp);
            bus_error(&path, &e)
        })?;
        debug!(topic, message_id = %message_id, bytes = payload.len(), "spooled message");
        Ok(message_id)
    }

    fn close(&self) -> BusResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(dir = %self.dir.display(), "spool bus closed");
        }
        Ok(())
    }
}

fn write_payload(temp: &Path, path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(temp)?;
    file.write_all(payload)?;
    file.sync_all()?;
    fs::rename(temp, path)
}

fn bus_error(path: &Path, error: &io::Error) -> BusError {
    let message = format!("{}: {error}", path.display());
    match error.kind() {
        io::ErrorKind::PermissionDenied => BusError::Unauthorized { message },
        _ => BusError::transient(message),
    }
}

fn is_payload(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(PAYLOAD_EXTENSION)
}

/// Highest sequence number already present under any topic.
fn last_sequence(dir: &Path) -> io::Result<u64> {
    let mut last = 0;
    for topic in fs::read_dir(dir)? {
        let topic = topic?.path();
        if !topic.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&topic)? {
            let path = entry?.path();
            if !is_payload(&path) {
                continue;
            }
            let sequence = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split('-').next())
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(sequence) = sequence {
                last = last.max(sequence);
            }
        }
    }
    Ok(last)
}
