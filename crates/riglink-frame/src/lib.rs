//! Fixed-length checksummed vector frames.
//!
//! Every steady-state message on a riglink carries exactly one numeric
//! vector of a length fixed at handshake time:
//! - an optional 4-byte little-endian sequence number
//! - `N` fixed-width slots (quantized `i8`/`i16` or raw `f64`)
//! - a 1-byte checksum over everything before it
//!
//! Pure encode/decode, no I/O.

pub mod codec;
pub mod error;
pub mod format;
pub mod sequence;

pub use codec::{
    verify_keepalive, DecodedFrame, FrameLayout, CHECKSUM_SIZE, KEEPALIVE, KEEPALIVE_LEN,
    SEQUENCE_SIZE,
};
pub use error::{FrameError, Result};
pub use format::{ChecksumKind, SlotFormat};
pub use sequence::SequenceTracker;
