use crate::format::SlotFormat;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    /// The byte length does not match the layout's wire length.
    #[error("frame length mismatch ({actual} bytes, expected {expected})")]
    LengthMismatch { expected: usize, actual: usize },

    /// The trailing checksum byte does not match the recomputed value.
    #[error("checksum mismatch (received {received:#04x}, computed {computed:#04x})")]
    ChecksumMismatch { received: u8, computed: u8 },

    /// The vector handed to the encoder has the wrong number of values.
    #[error("slot count mismatch ({actual} values, expected {expected})")]
    SlotCountMismatch { expected: usize, actual: usize },

    /// The quantization scale does not fit the slot format.
    #[error("invalid scale {scale} for {format} slots (max {max})")]
    InvalidScale {
        scale: f64,
        format: SlotFormat,
        max: f64,
    },

    /// A one-byte keepalive carried something other than [`crate::KEEPALIVE`].
    #[error("invalid keepalive byte {0:#04x}")]
    InvalidKeepalive(u8),

    /// A sequenced frame arrived that is not newer than the last accepted one.
    #[error("stale sequence {received} (last accepted {last})")]
    StaleSequence { last: u32, received: u32 },
}

pub type Result<T> = std::result::Result<T, FrameError>;
