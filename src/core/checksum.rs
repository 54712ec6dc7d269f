//! Checksums for free map and file header copies
//!
//! A checksum is stored big-endian at a fixed byte offset inside the buffer it
//! protects and is computed over the whole buffer with that field zeroed.
//! CRC-32 comes straight from `crc32fast`; the 16-bit variant folds the two
//! halves of the CRC-32 together.

use crate::error::{BlockFileError, Result};

/// Width of a stored checksum field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumWidth {
    Bits16,
    Bits32,
}

impl ChecksumWidth {
    /// Map a configured bit count onto a width
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            16 => Ok(ChecksumWidth::Bits16),
            32 => Ok(ChecksumWidth::Bits32),
            other => Err(BlockFileError::Configuration(format!(
                "checksum_bits must be 16 or 32, got {}",
                other
            ))),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            ChecksumWidth::Bits16 => 16,
            ChecksumWidth::Bits32 => 32,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }
}

const ZEROS: [u8; 4] = [0; 4];

/// Compute the checksum of `buf`, treating the field at `offset` as zero
///
/// Panics if the field does not lie within `buf`; callers size buffers from
/// a validated layout.
pub fn compute(buf: &[u8], offset: usize, width: ChecksumWidth) -> u32 {
    let end = offset + width.bytes();

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..offset]);
    hasher.update(&ZEROS[..width.bytes()]);
    hasher.update(&buf[end..]);
    let crc = hasher.finalize();

    match width {
        ChecksumWidth::Bits32 => crc,
        ChecksumWidth::Bits16 => (crc >> 16) ^ (crc & 0xffff),
    }
}

/// Read the stored checksum field
pub fn stored(buf: &[u8], offset: usize, width: ChecksumWidth) -> u32 {
    match width {
        ChecksumWidth::Bits16 => u16::from_be_bytes([buf[offset], buf[offset + 1]]) as u32,
        ChecksumWidth::Bits32 => u32::from_be_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]),
    }
}

/// Recompute and store the checksum in place
pub fn sign(buf: &mut [u8], offset: usize, width: ChecksumWidth) {
    let value = compute(buf, offset, width);
    match width {
        ChecksumWidth::Bits16 => {
            buf[offset..offset + 2].copy_from_slice(&(value as u16).to_be_bytes());
        }
        ChecksumWidth::Bits32 => {
            buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
        }
    }
}

/// Check the stored checksum against the buffer contents
pub fn verify(buf: &[u8], offset: usize, width: ChecksumWidth) -> bool {
    if offset + width.bytes() > buf.len() {
        return false;
    }
    stored(buf, offset, width) == compute(buf, offset, width)
}
