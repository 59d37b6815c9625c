//! Slot formats and checksum algorithms.
//!
//! Both ends of a link agree on these out of band (static configuration or
//! handshake extension arguments). There is no in-band type negotiation.

use std::fmt;
use std::str::FromStr;

/// Width and encoding of a single vector slot on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SlotFormat {
    /// 1-byte signed integer, quantized.
    #[default]
    I8,
    /// 2-byte little-endian signed integer, quantized.
    I16,
    /// 8-byte little-endian double, sent as-is.
    F64,
}

impl SlotFormat {
    /// Bytes per slot.
    pub const fn width(self) -> usize {
        match self {
            SlotFormat::I8 => 1,
            SlotFormat::I16 => 2,
            SlotFormat::F64 => 8,
        }
    }

    /// Default quantization scale.
    pub const fn default_scale(self) -> f64 {
        match self {
            SlotFormat::I8 => i8::MAX as f64,
            SlotFormat::I16 => i16::MAX as f64,
            SlotFormat::F64 => 1.0,
        }
    }

    /// Largest scale whose quantized values still fit the slot.
    pub const fn max_scale(self) -> f64 {
        match self {
            SlotFormat::I8 => i8::MAX as f64,
            SlotFormat::I16 => i16::MAX as f64,
            SlotFormat::F64 => f64::MAX,
        }
    }

    /// Whether values are clamped and quantized before encoding.
    pub const fn is_quantized(self) -> bool {
        !matches!(self, SlotFormat::F64)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SlotFormat::I8 => "i8",
            SlotFormat::I16 => "i16",
            SlotFormat::F64 => "f64",
        }
    }
}

impl fmt::Display for SlotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "i8" => Ok(SlotFormat::I8),
            "i16" => Ok(SlotFormat::I16),
            "f64" | "double" => Ok(SlotFormat::F64),
            other => Err(format!("unknown slot format '{other}' (expected i8, i16 or f64)")),
        }
    }
}

/// Single-byte checksum over every byte preceding it.
///
/// `Xor` is the canonical algorithm. `Sum8` (wrapping unsigned byte sum) is
/// kept for peers speaking the byte-sum variant. Neither is tamper-proof;
/// both detect any single-bit flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChecksumKind {
    #[default]
    Xor,
    Sum8,
}

impl ChecksumKind {
    /// Compute the checksum of `bytes`.
    pub fn compute(self, bytes: &[u8]) -> u8 {
        match self {
            ChecksumKind::Xor => bytes.iter().fold(0u8, |acc, b| acc ^ b),
            ChecksumKind::Sum8 => bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ChecksumKind::Xor => "xor",
            ChecksumKind::Sum8 => "sum8",
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xor" => Ok(ChecksumKind::Xor),
            "sum8" | "sum" => Ok(ChecksumKind::Sum8),
            other => Err(format!("unknown checksum '{other}' (expected xor or sum8)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_and_sum_differ() {
        let bytes = [0x01, 0x03, 0xFF];
        assert_eq!(ChecksumKind::Xor.compute(&bytes), 0x01 ^ 0x03 ^ 0xFF);
        assert_eq!(ChecksumKind::Sum8.compute(&bytes), 0x03);
    }

    #[test]
    fn zero_bytes_do_not_change_checksum() {
        for kind in [ChecksumKind::Xor, ChecksumKind::Sum8] {
            let base = kind.compute(&[0x10, 0x7F]);
            assert_eq!(kind.compute(&[0x10, 0x7F, 0x00, 0x00]), base);
        }
    }

    #[test]
    fn parses_names() {
        assert_eq!("I16".parse::<SlotFormat>().unwrap(), SlotFormat::I16);
        assert_eq!("double".parse::<SlotFormat>().unwrap(), SlotFormat::F64);
        assert!("u8".parse::<SlotFormat>().is_err());
        assert_eq!("sum".parse::<ChecksumKind>().unwrap(), ChecksumKind::Sum8);
    }

    #[test]
    fn widths() {
        assert_eq!(SlotFormat::I8.width(), 1);
        assert_eq!(SlotFormat::I16.width(), 2);
        assert_eq!(SlotFormat::F64.width(), 8);
    }
}
