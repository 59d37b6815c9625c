use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, BytesMut};
use riglink_frame::{FrameLayout, CHECKSUM_SIZE};
use time::Date;
use tracing::{debug, error, info, warn};

use crate::error::{RecordingError, Result};
use crate::file::{self, TIMESTAMP_SIZE};

/// Records held in memory before a flush is triggered.
pub const DEFAULT_CAPACITY: usize = 100;

/// Multiple of the capacity kept in memory while flushes keep failing.
pub const RETENTION_FACTOR: usize = 10;

/// Where and how a [`Recorder`] writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Output directory, created if missing.
    pub dir: PathBuf,
    /// File name prefix; the local date and `.bin` are appended.
    pub base_name: String,
    /// Records buffered before a flush.
    pub capacity: usize,
}

impl RecorderConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            base_name: "riglink".to_string(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Bounded buffer of timestamped outbound frames, flushed to a daily file.
///
/// All state sits behind one mutex: appends, threshold flushes and the
/// shutdown drain never interleave. A batch is written with a single append
/// and rolled back on failure, so the file only ever contains whole records.
#[derive(Debug)]
pub struct Recorder {
    path: PathBuf,
    layout: FrameLayout,
    capacity: usize,
    max_retained: usize,
    opened_on: Date,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    pending: VecDeque<Vec<u8>>,
    written: u64,
    dropped: u64,
    rollover_warned: bool,
}

impl Recorder {
    /// Open (or continue) today's recording file for frames of `layout`.
    pub fn create(config: RecorderConfig, layout: FrameLayout) -> Result<Self> {
        layout.validate()?;
        fs::create_dir_all(&config.dir).map_err(|source| RecordingError::io(&config.dir, source))?;

        let opened_on = file::local_today();
        let path = file::record_path(&config.dir, &config.base_name, opened_on);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RecordingError::io(&path, source))?;

        let capacity = config.capacity.max(1);
        info!(path = %path.display(), capacity, slots = layout.slots, "recording frames");
        Ok(Self {
            path,
            layout,
            capacity,
            max_retained: capacity.saturating_mul(RETENTION_FACTOR),
            opened_on,
            inner: Mutex::new(Inner {
                file,
                pending: VecDeque::with_capacity(capacity),
                written: 0,
                dropped: 0,
                rollover_warned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Timestamp and buffer one encoded frame, flushing at capacity.
    ///
    /// Frames shorter than the layout (fewer slots) are zero-padded. An
    /// error means the frame was rejected or the flush failed; in the latter
    /// case the records stay buffered for the next attempt.
    pub fn append(&self, frame: &[u8]) -> Result<()> {
        let record = self.stamp(frame)?;
        let mut inner = self.lock();
        inner.pending.push_back(record);
        if inner.pending.len() >= self.capacity {
            self.flush_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Write every buffered record now.
    pub fn flush(&self) -> Result<usize> {
        let mut inner = self.lock();
        self.flush_locked(&mut inner)
    }

    /// Drain the buffer at shutdown.
    pub fn flush_remaining(&self) -> Result<usize> {
        let mut inner = self.lock();
        let written = self.flush_locked(&mut inner)?;
        info!(
            path = %self.path.display(),
            flushed = written,
            total = inner.written,
            dropped = inner.dropped,
            "recording drained"
        );
        Ok(written)
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Records written to disk so far.
    pub fn written(&self) -> u64 {
        self.lock().written
    }

    /// Records discarded because flushes kept failing.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Whether the local date has moved past the file's date.
    ///
    /// Recording continues in the file opened at start. The first detection
    /// logs a warning; threshold flushes run the same check.
    pub fn date_rolled_over(&self) -> bool {
        let today = file::local_today();
        if today == self.opened_on {
            return false;
        }
        let mut inner = self.lock();
        self.note_rollover(&mut inner, today);
        true
    }

    // Returns true only on the call that logs the warning.
    fn note_rollover(&self, inner: &mut Inner, today: Date) -> bool {
        if today == self.opened_on || inner.rollover_warned {
            return false;
        }
        inner.rollover_warned = true;
        warn!(
            path = %self.path.display(),
            opened = %file::format_date(self.opened_on),
            today = %file::format_date(today),
            "date rolled over, still recording into the opening day's file"
        );
        true
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stamp(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let frame = normalize(frame, &self.layout)?;
        let mut record = Vec::with_capacity(TIMESTAMP_SIZE + frame.len());
        record.extend_from_slice(&file::unix_micros().to_le_bytes());
        record.extend_from_slice(&frame);
        Ok(record)
    }

    fn flush_locked(&self, inner: &mut Inner) -> Result<usize> {
        if inner.pending.is_empty() {
            return Ok(0);
        }

        let stride = file::record_len(&self.layout);
        let mut batch = BytesMut::with_capacity(inner.pending.len() * stride);
        for record in &inner.pending {
            batch.put_slice(record);
        }

        let previous_len = inner
            .file
            .metadata()
            .map_err(|source| RecordingError::io(&self.path, source))?
            .len();

        match inner.file.write_all(&batch).and_then(|()| inner.file.flush()) {
            Ok(()) => {
                let count = inner.pending.len();
                inner.pending.clear();
                inner.written += count as u64;
                debug!(path = %self.path.display(), count, "flushed records");
                self.note_rollover(inner, file::local_today());
                Ok(count)
            }
            Err(source) => {
                if let Err(err) = inner.file.set_len(previous_len) {
                    warn!(
                        path = %self.path.display(),
                        error = %err,
                        "failed to roll back partial write"
                    );
                }
                self.enforce_retention(inner);
                Err(RecordingError::io(&self.path, source))
            }
        }
    }

    fn enforce_retention(&self, inner: &mut Inner) {
        let excess = inner.pending.len().saturating_sub(self.max_retained);
        if excess == 0 {
            return;
        }
        inner.pending.drain(..excess);
        inner.dropped += excess as u64;
        error!(
            path = %self.path.display(),
            dropped = excess,
            total_dropped = inner.dropped,
            retained = inner.pending.len(),
            "recording backlog full, dropped oldest records"
        );
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let mut inner = self.lock();
        if inner.pending.is_empty() {
            return;
        }
        if let Err(err) = self.flush_locked(&mut inner) {
            warn!(error = %err, lost = inner.pending.len(), "failed to flush recording on drop");
        }
    }
}

/// Pad `frame` with zero slots before its checksum up to `layout`'s length.
///
/// Zero bytes leave both checksum algorithms unchanged.
fn normalize(frame: &[u8], layout: &FrameLayout) -> Result<Vec<u8>> {
    let stride = layout.wire_len();
    let minimum = layout.header_len() + CHECKSUM_SIZE;
    let width = layout.format.width();
    let fits = frame.len() <= stride
        && frame.len() >= minimum
        && (frame.len() - minimum) % width == 0;
    if !fits {
        return Err(RecordingError::FrameLength {
            stride,
            actual: frame.len(),
        });
    }

    let mut out = Vec::with_capacity(stride);
    let body = frame.len() - CHECKSUM_SIZE;
    out.extend_from_slice(&frame[..body]);
    out.resize(stride - CHECKSUM_SIZE, 0);
    out.extend_from_slice(&frame[body..]);
    Ok(out)
}
