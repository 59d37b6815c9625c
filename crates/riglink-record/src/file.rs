//! Recorded file layout and reader.
//!
//! Each record is `timestamp_us (u64 LE) + frame`, where `frame` is exactly
//! [`FrameLayout::wire_len`] bytes. Files are append-only and carry no header;
//! the reader must be told the layout.

use std::fs;
use std::path::{Path, PathBuf};

use riglink_frame::{FrameLayout, CHECKSUM_SIZE};
use time::{Date, OffsetDateTime};

use crate::error::{RecordingError, Result};

/// Timestamp prefix of every record.
pub const TIMESTAMP_SIZE: usize = 8;

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    /// Microseconds since the UNIX epoch when the frame was appended.
    pub timestamp_us: u64,
    pub sequence: Option<u32>,
    pub values: Vec<f64>,
    /// False when the stored checksum no longer matches (values are still
    /// decoded).
    pub checksum_ok: bool,
}

/// Bytes per record for `layout`.
pub fn record_len(layout: &FrameLayout) -> usize {
    TIMESTAMP_SIZE + layout.wire_len()
}

/// `<dir>/<base_name>_<YYYY-MM-DD>.bin`
pub fn record_path(dir: &Path, base_name: &str, date: Date) -> PathBuf {
    dir.join(format!("{base_name}_{}.bin", format_date(date)))
}

pub(crate) fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Current local date, falling back to UTC when the local offset cannot be
/// determined (e.g. multi-threaded processes on some platforms).
pub fn local_today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

/// Microseconds since the UNIX epoch.
pub fn unix_micros() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000).unwrap_or(0)
}

/// Read every record of a recorded file.
pub fn read_records(path: impl AsRef<Path>, layout: &FrameLayout) -> Result<Vec<RecordEntry>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| RecordingError::io(path, source))?;
    parse_records(path, &bytes, layout)
}

fn parse_records(path: &Path, bytes: &[u8], layout: &FrameLayout) -> Result<Vec<RecordEntry>> {
    let stride = record_len(layout);
    let trailing = bytes.len() % stride;
    if trailing != 0 {
        return Err(RecordingError::Truncated {
            path: path.to_path_buf(),
            trailing,
        });
    }

    let mut entries = Vec::with_capacity(bytes.len() / stride);
    for record in bytes.chunks_exact(stride) {
        let (stamp, frame) = record.split_at(TIMESTAMP_SIZE);
        let mut raw = [0u8; TIMESTAMP_SIZE];
        raw.copy_from_slice(stamp);
        let timestamp_us = u64::from_le_bytes(raw);

        let checksum_ok = layout.verify(frame).is_ok();
        let (sequence, values) = decode_unchecked(frame, layout);
        entries.push(RecordEntry {
            timestamp_us,
            sequence,
            values,
            checksum_ok,
        });
    }
    Ok(entries)
}

// Decode values even when the checksum is off, by recomputing it.
fn decode_unchecked(frame: &[u8], layout: &FrameLayout) -> (Option<u32>, Vec<f64>) {
    let mut fixed = frame.to_vec();
    let body_len = fixed.len() - CHECKSUM_SIZE;
    fixed[body_len] = layout.checksum.compute(&fixed[..body_len]);
    match layout.decode(&fixed) {
        Ok(decoded) => (decoded.sequence, decoded.values),
        Err(_) => (None, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use riglink_frame::SlotFormat;
    use time::Month;

    use super::*;

    #[test]
    fn path_uses_base_name_and_date() {
        let date = Date::from_calendar_date(2024, Month::March, 7).unwrap();
        let path = record_path(Path::new("/data"), "rig", date);
        assert_eq!(path, PathBuf::from("/data/rig_2024-03-07.bin"));
    }

    #[test]
    fn parses_records_and_flags_bad_checksums() {
        let layout = FrameLayout::new(2, SlotFormat::I8);
        let mut bytes = Vec::new();
        for (stamp, values) in [(10u64, [0.5, -0.5]), (20, [1.0, 0.0])] {
            bytes.extend_from_slice(&stamp.to_le_bytes());
            bytes.extend_from_slice(&layout.encode_to_vec(&values, None).unwrap());
        }
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let entries = parse_records(Path::new("x.bin"), &bytes, &layout).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp_us, 10);
        assert!(entries[0].checksum_ok);
        assert!(!entries[1].checksum_ok);
        assert_eq!(entries[1].values, vec![1.0, 0.0]);
    }

    #[test]
    fn trailing_partial_record_is_reported() {
        let layout = FrameLayout::new(2, SlotFormat::I8);
        let bytes = vec![0u8; record_len(&layout) + 3];
        let err = parse_records(Path::new("x.bin"), &bytes, &layout).unwrap_err();
        assert!(matches!(err, RecordingError::Truncated { trailing: 3, .. }));
    }
}
