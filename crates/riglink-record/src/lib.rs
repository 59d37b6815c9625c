//! Disk recording of outbound riglink frames.
//!
//! A [`Recorder`] timestamps each encoded frame, buffers it in memory and
//! appends batches to `<dir>/<base_name>_<YYYY-MM-DD>.bin`. Recording never
//! fails the real-time send path; callers log the returned errors.
//!
//! [`read_records`] reads a recorded file back given the frame layout.

pub mod buffer;
pub mod error;
pub mod file;

pub use buffer::{Recorder, RecorderConfig, DEFAULT_CAPACITY, RETENTION_FACTOR};
pub use error::{RecordingError, Result};
pub use file::{read_records, record_len, record_path, RecordEntry, TIMESTAMP_SIZE};
