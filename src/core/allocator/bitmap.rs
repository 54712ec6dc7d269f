//! Free block bitmap stored in a segment's free map bytes
//!
//! The bitmap is the persisted free map copy itself, one bit per block:
//! - 1 = free block
//! - 0 = used block
//!
//! Bits are LSB-first within each byte. The checksum field sits inside the
//! same bytes, so bitmap bits skip over it: block `i` lives at physical bit
//! `i` below the checksum and at `i + checksum_bits` above it.

use crate::checksum::{self, ChecksumWidth};
use crate::error::{BlockFileError, Result};
use crate::layout::Layout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeBlockMap {
    bytes: Vec<u8>,
    checksum_offset: usize,
    checksum_width: ChecksumWidth,
    total_blocks: u32,
}

impl FreeBlockMap {
    /// All blocks free
    pub fn new(layout: &Layout) -> Self {
        FreeBlockMap {
            bytes: vec![0xff; layout.free_map_size() as usize],
            checksum_offset: layout.checksum_offset(),
            checksum_width: layout.checksum_width(),
            total_blocks: layout.blocks_per_segment(),
        }
    }

    /// Wrap a free map copy read from disk
    ///
    /// The checksum is not checked here; see [`FreeBlockMap::verify`].
    pub fn from_bytes(bytes: Vec<u8>, layout: &Layout) -> Result<Self> {
        if bytes.len() as u64 != layout.free_map_size() {
            return Err(BlockFileError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "free map must be {} bytes, got {}",
                    layout.free_map_size(),
                    bytes.len()
                ),
            )));
        }

        Ok(FreeBlockMap {
            bytes,
            checksum_offset: layout.checksum_offset(),
            checksum_width: layout.checksum_width(),
            total_blocks: layout.blocks_per_segment(),
        })
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Physical (byte, bit) position of a block's bit
    fn position(&self, block: u32) -> (usize, u8) {
        let mut bit = block as usize;
        if bit >= self.checksum_offset * 8 {
            bit += self.checksum_width.bits() as usize;
        }
        (bit / 8, (bit % 8) as u8)
    }

    pub fn is_free(&self, block: u32) -> bool {
        if block >= self.total_blocks {
            return false;
        }
        let (byte, bit) = self.position(block);
        self.bytes[byte] & (1 << bit) != 0
    }

    /// Set a block's state; out-of-range blocks are ignored
    pub fn set_free(&mut self, block: u32, free: bool) {
        if block >= self.total_blocks {
            return;
        }
        let (byte, bit) = self.position(block);
        if free {
            self.bytes[byte] |= 1 << bit;
        } else {
            self.bytes[byte] &= !(1 << bit);
        }
    }

    /// Set every block in `start..=end`
    pub fn set_range(&mut self, start: u32, end: u32, free: bool) {
        for block in start..=end {
            self.set_free(block, free);
        }
    }

    /// True when every block in `start..=end` has the given state
    pub fn range_is(&self, start: u32, end: u32, free: bool) -> bool {
        (start..=end).all(|block| block < self.total_blocks && self.is_free(block) == free)
    }

    pub fn free_blocks(&self) -> u32 {
        (0..self.total_blocks).filter(|&b| self.is_free(b)).count() as u32
    }

    /// Recompute the checksum and return the bytes ready to persist
    pub fn signed_bytes(&mut self) -> &[u8] {
        checksum::sign(&mut self.bytes, self.checksum_offset, self.checksum_width);
        &self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn verify(&self) -> bool {
        checksum::verify(&self.bytes, self.checksum_offset, self.checksum_width)
    }
}
