//! Durable resume positions.
//!
//! # Position file format
//!
//! ```text
//! ┌──────────┬─────────┬───────────┬──────────────┬──────────────┐
//! │ magic(4) │ ver(2)  │ len(4)    │ token(len)   │ sha256(32)   │
//! │ "FRPS"   │ u16 LE  │ u32 LE    │ raw bytes    │ over header  │
//! │          │         │           │              │ and token    │
//! └──────────┴─────────┴───────────┴──────────────┴──────────────┘
//! ```
//!
//! Saves write a temporary file, fsync it, rename it over the position file
//! and fsync the directory. A crash at any point leaves either the old or
//! the new position, never a mix.

use crate::error::{TrackerError, TrackerResult};
use crate::event::{ResumeToken, StreamId};
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const MAGIC: &[u8; 4] = b"FRPS";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4;
const CHECKSUM_LEN: usize = 32;
/// Upper bound on a stored token; real resume tokens are a few hundred bytes.
const MAX_TOKEN_LEN: usize = 64 * 1024;

/// Persists the last confirmed-published position of one stream.
pub trait ResumeTracker: Send {
    /// Loads the saved position, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored position cannot be read or fails
    /// validation.
    fn load(&self) -> TrackerResult<Option<ResumeToken>>;

    /// Saves a position atomically.
    ///
    /// On error the previously saved position is left unchanged.
    fn save(&self, token: &ResumeToken) -> TrackerResult<()>;

    /// Removes the saved position so the next start subscribes without a
    /// resume token.
    fn clear(&self) -> TrackerResult<()>;
}

impl<T: ResumeTracker + Sync + ?Sized> ResumeTracker for Arc<T> {
    fn load(&self) -> TrackerResult<Option<ResumeToken>> {
        (**self).load()
    }

    fn save(&self, token: &ResumeToken) -> TrackerResult<()> {
        (**self).save(token)
    }

    fn clear(&self) -> TrackerResult<()> {
        (**self).clear()
    }
}

/// A file-backed tracker holding an exclusive lock on its stream's position.
///
/// The lock is released when the tracker is dropped.
#[derive(Debug)]
pub struct FileResumeTracker {
    dir: PathBuf,
    stream: StreamId,
    _lock_file: File,
}

impl FileResumeTracker {
    /// Opens the tracker for `stream` under `dir`, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Locked`] if another process tracks the same
    /// stream, or an I/O error.
    pub fn open(dir: impl AsRef<Path>, stream: &StreamId) -> TrackerResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let key = stream.storage_key();
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(format!("{key}.lock")))?;

        // Try to acquire exclusive lock (non-blocking)
        if lock_file.try_lock_exclusive().is_err() {
            return Err(TrackerError::Locked { stream: key });
        }

        let tracker = Self {
            dir: dir.to_path_buf(),
            stream: stream.clone(),
            _lock_file: lock_file,
        };

        // A temp file can only be left over from a save interrupted before
        // its rename, so the committed position is still intact.
        let temp_path = tracker.temp_path();
        if temp_path.exists() {
            fs::remove_file(&temp_path)?;
        }

        Ok(tracker)
    }

    /// Reads the committed position of `stream` without taking its lock.
    ///
    /// Saves replace the file by rename, so this is safe while a forwarder
    /// holds the tracker.
    pub fn peek(dir: impl AsRef<Path>, stream: &StreamId) -> TrackerResult<Option<ResumeToken>> {
        read_position(Self::path_for(dir, stream))
    }

    /// Path of the committed position file of `stream` under `dir`.
    pub fn path_for(dir: impl AsRef<Path>, stream: &StreamId) -> PathBuf {
        dir.as_ref().join(format!("{}.pos", stream.storage_key()))
    }

    /// Path of the committed position file.
    pub fn position_path(&self) -> PathBuf {
        Self::path_for(&self.dir, &self.stream)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.pos.tmp", self.stream.storage_key()))
    }

    /// Syncs the position directory so renames are durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> TrackerResult<()> {
        let dir = File::open(&self.dir)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> TrackerResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced
        Ok(())
    }
}

impl ResumeTracker for FileResumeTracker {
    fn load(&self) -> TrackerResult<Option<ResumeToken>> {
        read_position(self.position_path())
    }

    fn save(&self, token: &ResumeToken) -> TrackerResult<()> {
        let data = encode_position(token)?;
        let temp_path = self.temp_path();

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.position_path())?;
        self.sync_directory()?;

        debug!(stream = %self.stream, resume_token = %token, "position saved");
        Ok(())
    }

    fn clear(&self) -> TrackerResult<()> {
        let path = self.position_path();
        if path.exists() {
            fs::remove_file(&path)?;
            self.sync_directory()?;
        }
        Ok(())
    }
}

fn read_position(path: PathBuf) -> TrackerResult<Option<ResumeToken>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(&path)?;
    decode_position(&data)
        .map(Some)
        .map_err(|message| TrackerError::Corrupted { path, message })
}

fn encode_position(token: &ResumeToken) -> TrackerResult<Vec<u8>> {
    let bytes = token.as_bytes();
    if bytes.len() > MAX_TOKEN_LEN {
        return Err(TrackerError::SaveFailed {
            message: format!("token of {} bytes exceeds {MAX_TOKEN_LEN}", bytes.len()),
        });
    }
    let mut data = Vec::with_capacity(HEADER_LEN + bytes.len() + CHECKSUM_LEN);
    data.extend_from_slice(MAGIC);
    data.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    data.extend_from_slice(bytes);
    let checksum = Sha256::digest(&data);
    data.extend_from_slice(&checksum);
    Ok(data)
}

fn decode_position(data: &[u8]) -> Result<ResumeToken, String> {
    if data.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(format!("file too short ({} bytes)", data.len()));
    }
    if &data[0..4] != MAGIC {
        return Err("bad magic".to_string());
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != FORMAT_VERSION {
        return Err(format!("unsupported version {version}"));
    }
    let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    if data.len() != HEADER_LEN + len + CHECKSUM_LEN {
        return Err(format!(
            "length mismatch: header says {len} token bytes, file has {}",
            data.len()
        ));
    }
    let body_end = HEADER_LEN + len;
    let expected = Sha256::digest(&data[..body_end]);
    if expected.as_slice() != &data[body_end..] {
        return Err("checksum mismatch".to_string());
    }
    Ok(ResumeToken::from_bytes(data[HEADER_LEN..body_end].to_vec()))
}

/// An in-memory tracker for testing.
///
/// Clones share state, so a test can keep one handle while the forwarder
/// owns another. Every successful save is recorded in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryResumeTracker {
    state: Arc<Mutex<MemoryTrackerState>>,
}

#[derive(Debug, Default)]
struct MemoryTrackerState {
    current: Option<ResumeToken>,
    history: Vec<ResumeToken>,
    fail_saves: u32,
}

impl MemoryResumeTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker with a saved position.
    pub fn with_position(token: ResumeToken) -> Self {
        let tracker = Self::new();
        tracker.state.lock().current = Some(token);
        tracker
    }

    /// Makes the next `count` saves fail.
    pub fn fail_next_saves(&self, count: u32) {
        self.state.lock().fail_saves = count;
    }

    /// Every successfully saved token, in order.
    pub fn history(&self) -> Vec<ResumeToken> {
        self.state.lock().history.clone()
    }

    /// The current position.
    pub fn current(&self) -> Option<ResumeToken> {
        self.state.lock().current.clone()
    }
}

impl ResumeTracker for MemoryResumeTracker {
    fn load(&self) -> TrackerResult<Option<ResumeToken>> {
        Ok(self.current())
    }

    fn save(&self, token: &ResumeToken) -> TrackerResult<()> {
        let mut state = self.state.lock();
        if state.fail_saves > 0 {
            state.fail_saves -= 1;
            return Err(TrackerError::SaveFailed {
                message: "injected failure".to_string(),
            });
        }
        state.current = Some(token.clone());
        state.history.push(token.clone());
        Ok(())
    }

    fn clear(&self) -> TrackerResult<()> {
        self.state.lock().current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stream() -> StreamId {
        StreamId::new("shop", "orders")
    }

    fn token(bytes: &[u8]) -> ResumeToken {
        ResumeToken::from_bytes(bytes.to_vec())
    }

    #[test]
    fn empty_load() {
        let dir = tempdir().unwrap();
        let tracker = FileResumeTracker::open(dir.path(), &stream()).unwrap();
        assert_eq!(tracker.load().unwrap(), None);
    }

    #[test]
    fn save_and_reload_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let tracker = FileResumeTracker::open(dir.path(), &stream()).unwrap();
            tracker.save(&token(b"first")).unwrap();
            tracker.save(&token(b"second")).unwrap();
        }
        let tracker = FileResumeTracker::open(dir.path(), &stream()).unwrap();
        assert_eq!(tracker.load().unwrap(), Some(token(b"second")));
    }

    #[test]
    fn lock_prevents_second_open() {
        let dir = tempdir().unwrap();
        let _first = FileResumeTracker::open(dir.path(), &stream()).unwrap();
        let second = FileResumeTracker::open(dir.path(), &stream());
        assert!(matches!(second, Err(TrackerError::Locked { .. })));
    }

    #[test]
    fn peek_reads_without_lock() {
        let dir = tempdir().unwrap();
        let tracker = FileResumeTracker::open(dir.path(), &stream()).unwrap();
        assert_eq!(FileResumeTracker::peek(dir.path(), &stream()).unwrap(), None);
        tracker.save(&token(b"held")).unwrap();
        assert_eq!(
            FileResumeTracker::peek(dir.path(), &stream()).unwrap(),
            Some(token(b"held"))
        );
    }

    #[test]
    fn streams_are_independent() {
        let dir = tempdir().unwrap();
        let a = FileResumeTracker::open(dir.path(), &StreamId::new("shop", "orders")).unwrap();
        let b = FileResumeTracker::open(dir.path(), &StreamId::new("shop", "users")).unwrap();
        a.save(&token(b"a")).unwrap();
        assert_eq!(b.load().unwrap(), None);
    }

    #[test]
    fn interrupted_save_keeps_previous_position() {
        let dir = tempdir().unwrap();
        {
            let tracker = FileResumeTracker::open(dir.path(), &stream()).unwrap();
            tracker.save(&token(b"committed")).unwrap();
            // Crash after writing the temp file but before the rename.
            fs::write(tracker.temp_path(), b"FRPS partial").unwrap();
        }
        let tracker = FileResumeTracker::open(dir.path(), &stream()).unwrap();
        assert_eq!(tracker.load().unwrap(), Some(token(b"committed")));
        assert!(!tracker.temp_path().exists());
    }

    #[test]
    fn corruption_detected() {
        let dir = tempdir().unwrap();
        let tracker = FileResumeTracker::open(dir.path(), &stream()).unwrap();
        tracker.save(&token(b"abc")).unwrap();

        let path = tracker.position_path();
        let mut data = fs::read(&path).unwrap();
        data[HEADER_LEN] ^= 0xff;
        fs::write(&path, &data).unwrap();

        assert!(matches!(
            tracker.load(),
            Err(TrackerError::Corrupted { .. })
        ));
    }

    #[test]
    fn truncated_file_detected() {
        let dir = tempdir().unwrap();
        let tracker = FileResumeTracker::open(dir.path(), &stream()).unwrap();
        fs::write(tracker.position_path(), b"FRPS").unwrap();
        assert!(matches!(
            tracker.load(),
            Err(TrackerError::Corrupted { .. })
        ));
    }

    #[test]
    fn clear_removes_position() {
        let dir = tempdir().unwrap();
        let tracker = FileResumeTracker::open(dir.path(), &stream()).unwrap();
        tracker.save(&token(b"x")).unwrap();
        tracker.clear().unwrap();
        assert_eq!(tracker.load().unwrap(), None);
        tracker.clear().unwrap();
    }

    #[test]
    fn memory_tracker_records_history() {
        let tracker = MemoryResumeTracker::new();
        let handle = tracker.clone();
        tracker.save(&token(b"1")).unwrap();
        tracker.fail_next_saves(1);
        assert!(tracker.save(&token(b"2")).is_err());
        tracker.save(&token(b"3")).unwrap();
        assert_eq!(handle.history(), vec![token(b"1"), token(b"3")]);
        assert_eq!(handle.current(), Some(token(b"3")));
    }

    #[test]
    fn empty_token_roundtrip() {
        let data = encode_position(&token(b"")).unwrap();
        assert_eq!(decode_position(&data).unwrap(), token(b""));
    }
}
