use std::io;
use std::path::PathBuf;

use riglink_frame::FrameError;

/// Errors that can occur while recording or reading recorded frames.
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    /// Filesystem operation on the recording file failed.
    #[error("recording I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// The frame layout is unusable for recording.
    #[error("invalid recording layout: {0}")]
    InvalidLayout(#[from] FrameError),

    /// A frame cannot be normalized to the recording stride.
    #[error("frame of {actual} bytes does not fit the {stride}-byte record layout")]
    FrameLength { stride: usize, actual: usize },

    /// A recorded file ends in the middle of a record.
    #[error("{} ends with a truncated record ({trailing} bytes)", path.display())]
    Truncated { path: PathBuf, trailing: usize },
}

impl RecordingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RecordingError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RecordingError>;
