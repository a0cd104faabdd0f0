//! A change feed backed by a JSON-lines file.
//!
//! Each line holds one change event:
//!
//! ```text
//! {"operationType":"insert","clusterTime":"2024-05-01T12:30:00Z","fullDocument":{"_id":"abc123"}}
//! ```
//!
//! Every line carries its `clusterTime`, which becomes the envelope
//! timestamp, so replaying a file yields the same envelopes.
//!
//! The resume token of an event is the byte offset just past its line,
//! stored as a big-endian `u64`. The file is tailed, so lines appended by
//! another process are picked up. A file shorter than a token's offset has
//! been truncated or replaced and the token is reported expired.

use chrono::{DateTime, Utc};
use feedrelay_core::{
    ChangeCursor, ChangeEvent, ChangeStreamSource, Document, FeedError, FeedFilter, FeedResult,
    OperationType, ResumeToken, StreamId,
};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// How often an idle cursor re-checks the file for appended lines.
const TAIL_INTERVAL: Duration = Duration::from_millis(20);

/// File extension of feed files.
pub const FEED_EXTENSION: &str = "jsonl";

/// A change feed read from one JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonlChangeStream {
    path: PathBuf,
}

impl JsonlChangeStream {
    /// Reads the feed at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads `<dir>/<database>.<collection>.jsonl`.
    pub fn for_stream(dir: impl AsRef<Path>, stream: &StreamId) -> Self {
        Self::new(
            dir.as_ref()
                .join(format!("{}.{FEED_EXTENSION}", stream.storage_key())),
        )
    }

    /// The feed file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChangeStreamSource for JsonlChangeStream {
    type Cursor = JsonlCursor;

    fn subscribe(
        &self,
        filter: &FeedFilter,
        resume_after: Option<&ResumeToken>,
        _timeout: Duration,
    ) -> FeedResult<JsonlCursor> {
        // Opening a local file has no remote wait, so `timeout` is not applied.
        let start = match resume_after {
            Some(token) => decode_offset(token)?,
            None => 0,
        };

        let file = File::open(&self.path).map_err(|e| io_error(&self.path, &e))?;
        let len = file
            .metadata()
            .map_err(|e| io_error(&self.path, &e))?
            .len();
        if start > len {
            return Err(FeedError::expired(format!(
                "offset {start} is past the end of {} ({len} bytes)",
                self.path.display()
            )));
        }

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(start))
            .map_err(|e| io_error(&self.path, &e))?;
        debug!(path = %self.path.display(), offset = start, "opened feed file");

        Ok(JsonlCursor {
            path: self.path.clone(),
            reader,
            offset: start,
            partial: Vec::new(),
            filter: filter.clone(),
        })
    }
}

/// An open position in a JSON-lines feed file.
#[derive(Debug)]
pub struct JsonlCursor {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    partial: Vec<u8>,
    filter: FeedFilter,
}

impl JsonlCursor {
    /// Byte offset just past the last complete line consumed.
    #[cfg(test)]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn check_truncated(&self) -> FeedResult<()> {
        let len = fs::metadata(&self.path)
            .map_err(|e| io_error(&self.path, &e))?
            .len();
        let consumed = self.offset + self.partial.len() as u64;
        if len < consumed {
            return Err(FeedError::expired(format!(
                "{} was truncated to {len} bytes while reading at offset {consumed}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl ChangeCursor for JsonlCursor {
    fn next_event(&mut self, wait: Duration) -> FeedResult<Option<ChangeEvent>> {
        let deadline = Instant::now() + wait;
        loop {
            let read = self
                .reader
                .read_until(b'\n', &mut self.partial)
                .map_err(|e| io_error(&self.path, &e))?;

            if self.partial.last() == Some(&b'\n') {
                let line = std::mem::take(&mut self.partial);
                self.offset += line.len() as u64;
                let token = encode_offset(self.offset);
                match parse_line(&line, token)? {
                    Some(event)
                        if self.filter.allows(&event.operation)
                            || event.operation == OperationType::Invalidate =>
                    {
                        return Ok(Some(event))
                    }
                    _ => continue,
                }
            }

            if read == 0 {
                self.check_truncated()?;
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                thread::sleep(TAIL_INTERVAL.min(deadline - now));
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    operation_type: String,
    cluster_time: String,
    #[serde(default)]
    full_document: Option<Document>,
}

/// Parses one line. Blank lines yield `None`.
fn parse_line(line: &[u8], token: ResumeToken) -> FeedResult<Option<ChangeEvent>> {
    let text = std::str::from_utf8(line)
        .map_err(|e| FeedError::unavailable_fatal(format!("line before {token} is not UTF-8: {e}")))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }

    let raw: RawEvent = serde_json::from_str(text)
        .map_err(|e| FeedError::unavailable_fatal(format!("malformed event before {token}: {e}")))?;
    let operation = match OperationType::from_str(&raw.operation_type) {
        Ok(operation) => operation,
        Err(never) => match never {},
    };
    let cluster_time = DateTime::parse_from_rfc3339(&raw.cluster_time)
        .map_err(|e| {
            FeedError::unavailable_fatal(format!(
                "bad clusterTime {:?} before {token}: {e}",
                raw.cluster_time
            ))
        })?
        .with_timezone(&Utc);

    Ok(Some(ChangeEvent {
        operation,
        full_document: raw.full_document,
        resume_token: token,
        cluster_time,
    }))
}

/// Encodes a byte offset as a resume token.
pub fn encode_offset(offset: u64) -> ResumeToken {
    ResumeToken::from_bytes(offset.to_be_bytes().to_vec())
}

/// Decodes a resume token produced by [`encode_offset`].
pub fn decode_offset(token: &ResumeToken) -> FeedResult<u64> {
    let bytes: [u8; 8] = token
        .as_bytes()
        .try_into()
        .map_err(|_| FeedError::expired(format!("{token} is not a feed file offset")))?;
    Ok(u64::from_be_bytes(bytes))
}

fn io_error(path: &Path, error: &io::Error) -> FeedError {
    FeedError::unavailable_retryable(format!("{}: {error}", path.display()))
}
