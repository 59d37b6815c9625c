use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::format::{ChecksumKind, SlotFormat};

/// Sequence prefix: 4-byte little-endian unsigned.
pub const SEQUENCE_SIZE: usize = 4;

/// Trailing checksum: 1 byte.
pub const CHECKSUM_SIZE: usize = 1;

/// Byte sent in place of a data frame when a direction declares zero values.
pub const KEEPALIVE: u8 = 0x00;

/// Wire length of a keepalive.
pub const KEEPALIVE_LEN: usize = 1;

/// Shape of every frame exchanged in one direction of a link.
///
/// Wire format:
/// ```text
/// ┌───────────────┬──────────────────────────┬──────────┐
/// │ Sequence (4B) │ Payload                  │ Checksum │
/// │ LE, optional  │ slots * format.width()   │ (1B)     │
/// └───────────────┴──────────────────────────┴──────────┘
/// ```
///
/// The checksum covers every byte before it, sequence included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameLayout {
    /// Number of values per frame.
    pub slots: usize,
    /// Slot encoding.
    pub format: SlotFormat,
    /// Quantization scale (`wire = round(clamp(v) * scale)`).
    pub scale: f64,
    /// Whether frames carry a sequence prefix.
    pub sequenced: bool,
    /// Checksum algorithm.
    pub checksum: ChecksumKind,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub sequence: Option<u32>,
    pub values: Vec<f64>,
}

impl FrameLayout {
    /// Layout with the format's default scale, no sequence and XOR checksum.
    pub fn new(slots: usize, format: SlotFormat) -> Self {
        Self {
            slots,
            format,
            scale: format.default_scale(),
            sequenced: false,
            checksum: ChecksumKind::default(),
        }
    }

    /// Override the quantization scale.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Enable or disable the sequence prefix.
    pub fn with_sequence(mut self, sequenced: bool) -> Self {
        self.sequenced = sequenced;
        self
    }

    /// Override the checksum algorithm.
    pub fn with_checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = checksum;
        self
    }

    /// Same layout with a different slot count.
    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    /// Check that the scale is usable for the slot format.
    pub fn validate(&self) -> Result<()> {
        let max = self.format.max_scale();
        if !self.scale.is_finite() || self.scale <= 0.0 || self.scale > max {
            return Err(FrameError::InvalidScale {
                scale: self.scale,
                format: self.format,
                max,
            });
        }
        Ok(())
    }

    /// Bytes before the payload.
    pub fn header_len(&self) -> usize {
        if self.sequenced {
            SEQUENCE_SIZE
        } else {
            0
        }
    }

    /// Payload bytes.
    pub fn payload_len(&self) -> usize {
        self.slots * self.format.width()
    }

    /// Total bytes on the wire.
    pub fn wire_len(&self) -> usize {
        self.header_len() + self.payload_len() + CHECKSUM_SIZE
    }

    /// One quantization step, the worst-case round-trip error bound.
    pub fn resolution(&self) -> f64 {
        1.0 / self.scale
    }

    /// Encode `values` into `dst`.
    ///
    /// `sequence` is written only when the layout is sequenced (0 when `None`).
    pub fn encode(&self, values: &[f64], sequence: Option<u32>, dst: &mut BytesMut) -> Result<()> {
        if values.len() != self.slots {
            return Err(FrameError::SlotCountMismatch {
                expected: self.slots,
                actual: values.len(),
            });
        }

        let start = dst.len();
        dst.reserve(self.wire_len());
        if self.sequenced {
            dst.put_u32_le(sequence.unwrap_or(0));
        }

        for &value in values {
            match self.format {
                SlotFormat::I8 => dst.put_i8(quantize(value, self.scale) as i8),
                SlotFormat::I16 => dst.put_i16_le(quantize(value, self.scale) as i16),
                SlotFormat::F64 => dst.put_f64_le(value),
            }
        }

        let checksum = self.checksum.compute(&dst[start..]);
        dst.put_u8(checksum);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn encode_to_vec(&self, values: &[f64], sequence: Option<u32>) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(values, sequence, &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Check length and checksum without decoding values.
    pub fn verify(&self, src: &[u8]) -> Result<()> {
        let expected = self.wire_len();
        if src.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: src.len(),
            });
        }

        let (body, trailer) = src.split_at(expected - CHECKSUM_SIZE);
        let computed = self.checksum.compute(body);
        if trailer[0] != computed {
            return Err(FrameError::ChecksumMismatch {
                received: trailer[0],
                computed,
            });
        }
        Ok(())
    }

    /// Decode a complete frame.
    pub fn decode(&self, src: &[u8]) -> Result<DecodedFrame> {
        self.verify(src)?;

        let header = self.header_len();
        let sequence = self
            .sequenced
            .then(|| u32::from_le_bytes([src[0], src[1], src[2], src[3]]));

        let payload = &src[header..header + self.payload_len()];
        let values = payload
            .chunks_exact(self.format.width())
            .map(|chunk| match self.format {
                SlotFormat::I8 => i8::from_le_bytes([chunk[0]]) as f64 / self.scale,
                SlotFormat::I16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f64 / self.scale,
                SlotFormat::F64 => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    f64::from_le_bytes(raw)
                }
            })
            .collect();

        Ok(DecodedFrame { sequence, values })
    }
}

/// Check that `src` is exactly one keepalive byte.
pub fn verify_keepalive(src: &[u8]) -> Result<()> {
    match src {
        [KEEPALIVE] => Ok(()),
        [other] => Err(FrameError::InvalidKeepalive(*other)),
        _ => Err(FrameError::LengthMismatch {
            expected: KEEPALIVE_LEN,
            actual: src.len(),
        }),
    }
}

fn quantize(value: f64, scale: f64) -> f64 {
    let clamped = if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    };
    (clamped * scale).round()
}
