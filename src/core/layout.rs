//! Block file geometry
//!
//! A [`LayoutConfig`] carries the handful of knobs persisted in every file
//! header. [`Layout`] validates them once and derives every size, offset,
//! bit width and capacity the rest of the engine needs. A layout never
//! changes after construction and is shared read-only behind an `Arc`.
//!
//! ## Derived quantities (default config)
//!
//! ```text
//! block_size          = 2^12                 = 4096
//! free_map_size       = 2^12                 = 4096
//! blocks_per_segment  = 4096*8 - 16          = 32752
//! block_num_bits      = ceil(log2(32752))    = 15
//! segment_num_bits    = 32 - 4 - 15          = 13
//! segment_count       = 2^13                 = 8192
//! ```

use crate::checksum::ChecksumWidth;
use crate::error::{BlockFileError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fixed bytes of a file header copy besides the config text:
/// checksum (4) + segment count (8) + config length (2) + app-data length (2)
pub(crate) const HEADER_FIXED_BYTES: usize = 16;

const MAX_BLOCK_SIZE_EXP: u32 = 30;
const MAX_FREE_MAP_SIZE_EXP: u32 = 24;

/// Persisted layout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Block size as a power of two
    pub block_size_exp: u32,

    /// Free map size as a power of two (defaults to `block_size_exp`)
    pub free_map_size_exp: Option<u32>,

    /// Free map checksum width (16 or 32)
    pub checksum_bits: u32,

    /// Byte offset of the checksum inside each free map copy
    pub checksum_offset: u32,

    /// Width of a packed handle (32 or 64)
    pub handle_bits: u32,

    /// Width of the span field of a handle
    pub span_bits: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            block_size_exp: 12,
            free_map_size_exp: None,
            checksum_bits: 16,
            checksum_offset: 0,
            handle_bits: 32,
            span_bits: 4,
        }
    }
}

impl LayoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size_exp(mut self, exp: u32) -> Self {
        self.block_size_exp = exp;
        self
    }

    pub fn with_free_map_size_exp(mut self, exp: u32) -> Self {
        self.free_map_size_exp = Some(exp);
        self
    }

    pub fn with_checksum_bits(mut self, bits: u32) -> Self {
        self.checksum_bits = bits;
        self
    }

    pub fn with_checksum_offset(mut self, offset: u32) -> Self {
        self.checksum_offset = offset;
        self
    }

    pub fn with_handle_bits(mut self, bits: u32) -> Self {
        self.handle_bits = bits;
        self
    }

    pub fn with_span_bits(mut self, bits: u32) -> Self {
        self.span_bits = bits;
        self
    }

    /// Free map exponent after applying the default
    pub fn resolved_free_map_size_exp(&self) -> u32 {
        self.free_map_size_exp.unwrap_or(self.block_size_exp)
    }

    /// Parse a config from TOML text
    ///
    /// Missing keys take their default values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Compact JSON form embedded in file headers and handle strings
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check every constraint a usable layout must satisfy
    pub fn validate(&self) -> Result<()> {
        Layout::new(*self).map(|_| ())
    }
}

fn config_error(msg: String) -> BlockFileError {
    BlockFileError::Configuration(msg)
}

/// `ceil(log2(n))`, zero for `n <= 1`
fn ceil_log2(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        u64::BITS - (n - 1).leading_zeros()
    }
}

fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Validated, fully derived geometry of a block file
#[derive(Debug, Clone)]
pub struct Layout {
    config: LayoutConfig,
    checksum_width: ChecksumWidth,
    block_size: u64,
    free_map_size: u64,
    blocks_per_segment: u32,
    block_num_bits: u32,
    segment_num_bits: u32,
    span_count: u32,
}

impl PartialEq for Layout {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config
    }
}

impl Eq for Layout {}

impl Layout {
    /// Validate a config and derive the layout
    pub fn new(config: LayoutConfig) -> Result<Self> {
        if config.handle_bits != 32 && config.handle_bits != 64 {
            return Err(config_error(format!(
                "handle_bits must be 32 or 64, got {}",
                config.handle_bits
            )));
        }

        let checksum_width = ChecksumWidth::from_bits(config.checksum_bits)?;

        if config.block_size_exp > MAX_BLOCK_SIZE_EXP {
            return Err(config_error(format!(
                "block_size_exp {} exceeds {}",
                config.block_size_exp, MAX_BLOCK_SIZE_EXP
            )));
        }

        let free_map_size_exp = config.resolved_free_map_size_exp();
        if free_map_size_exp > MAX_FREE_MAP_SIZE_EXP || free_map_size_exp >= config.handle_bits {
            return Err(config_error(format!(
                "free_map_size_exp {} out of range",
                free_map_size_exp
            )));
        }

        let block_size = 1u64 << config.block_size_exp;
        let free_map_size = 1u64 << free_map_size_exp;
        let checksum_bytes = checksum_width.bytes() as u64;

        if free_map_size < checksum_bytes + 1 {
            return Err(config_error(format!(
                "free map of {} bytes leaves no room beside a {}-bit checksum",
                free_map_size, config.checksum_bits
            )));
        }

        if config.checksum_offset as u64 + checksum_bytes > free_map_size {
            return Err(config_error(format!(
                "checksum_offset {} does not fit a {}-byte free map",
                config.checksum_offset, free_map_size
            )));
        }

        if config.span_bits >= config.handle_bits {
            return Err(config_error(format!(
                "span_bits {} must be less than handle_bits {}",
                config.span_bits, config.handle_bits
            )));
        }

        let blocks_per_segment = free_map_size * 8 - config.checksum_bits as u64;
        let block_num_bits = ceil_log2(blocks_per_segment);

        if block_num_bits + config.span_bits > config.handle_bits {
            return Err(config_error(format!(
                "{} block bits and {} span bits exceed a {}-bit handle",
                block_num_bits, config.span_bits, config.handle_bits
            )));
        }
        let segment_num_bits = config.handle_bits - config.span_bits - block_num_bits;

        // A single span must fit inside a fresh segment
        let span_count = 1u64 << config.span_bits;
        if span_count > blocks_per_segment {
            return Err(config_error(format!(
                "span of {} blocks exceeds {} blocks per segment",
                span_count, blocks_per_segment
            )));
        }

        let mut normalized = config;
        normalized.free_map_size_exp = Some(free_map_size_exp);

        let config_len = normalized.to_json()?.len() as u64;
        if HEADER_FIXED_BYTES as u64 + config_len > block_size {
            return Err(config_error(format!(
                "file header needs {} bytes but a block holds {}",
                HEADER_FIXED_BYTES as u64 + config_len,
                block_size
            )));
        }

        Ok(Layout {
            config: normalized,
            checksum_width,
            block_size,
            free_map_size,
            blocks_per_segment: blocks_per_segment as u32,
            block_num_bits,
            segment_num_bits,
            span_count: span_count as u32,
        })
    }

    /// Normalized config (free map exponent always present)
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn handle_bits(&self) -> u32 {
        self.config.handle_bits
    }

    pub fn checksum_width(&self) -> ChecksumWidth {
        self.checksum_width
    }

    /// Byte offset of the checksum inside a free map copy
    pub fn checksum_offset(&self) -> usize {
        self.config.checksum_offset as usize
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn free_map_size(&self) -> u64 {
        self.free_map_size
    }

    pub fn blocks_per_segment(&self) -> u32 {
        self.blocks_per_segment
    }

    pub fn block_num_bits(&self) -> u32 {
        self.block_num_bits
    }

    pub fn segment_num_bits(&self) -> u32 {
        self.segment_num_bits
    }

    pub fn span_bits(&self) -> u32 {
        self.config.span_bits
    }

    /// Maximum number of segments a handle can address
    pub fn segment_count(&self) -> u64 {
        1u64 << self.segment_num_bits
    }

    /// Number of distinct span lengths
    pub fn span_count(&self) -> u32 {
        self.span_count
    }

    pub fn max_span_number(&self) -> u32 {
        self.span_count - 1
    }

    pub fn max_block_number(&self) -> u32 {
        self.blocks_per_segment - 1
    }

    pub fn max_segment_number(&self) -> u64 {
        low_mask(self.segment_num_bits)
    }

    pub fn is_valid_segment_number(&self, n: u64) -> bool {
        n <= self.max_segment_number()
    }

    pub fn is_valid_block_number(&self, n: u32) -> bool {
        n <= self.max_block_number()
    }

    pub fn is_valid_span_number(&self, n: u32) -> bool {
        n <= self.max_span_number()
    }

    pub fn segment_shift(&self) -> u32 {
        0
    }

    pub fn block_shift(&self) -> u32 {
        self.segment_num_bits
    }

    pub fn span_shift(&self) -> u32 {
        self.segment_num_bits + self.block_num_bits
    }

    pub fn segment_mask(&self) -> u64 {
        low_mask(self.segment_num_bits)
    }

    pub fn block_mask(&self) -> u64 {
        low_mask(self.block_num_bits)
    }

    pub fn span_mask(&self) -> u64 {
        low_mask(self.config.span_bits)
    }

    /// Both free map copies
    pub fn segment_header_size(&self) -> u64 {
        2 * self.free_map_size
    }

    pub fn free_map_primary_offset(&self) -> u64 {
        0
    }

    pub fn free_map_secondary_offset(&self) -> u64 {
        self.free_map_size
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_header_size() + self.blocks_per_segment as u64 * self.block_size
    }

    /// Both file header copies, one block each
    pub fn file_header_size(&self) -> u64 {
        2 * self.block_size
    }

    pub fn header_primary_offset(&self) -> u64 {
        0
    }

    pub fn header_secondary_offset(&self) -> u64 {
        self.block_size
    }

    /// Absolute file offset of a segment
    pub fn segment_offset(&self, segment_number: u64) -> u64 {
        self.file_header_size() + segment_number * self.segment_size()
    }

    /// Absolute file offset of a block
    pub fn block_offset(&self, segment_number: u64, block_number: u32) -> u64 {
        self.segment_offset(segment_number)
            + self.segment_header_size()
            + block_number as u64 * self.block_size
    }

    /// Largest buffer a single handle can hold
    pub fn max_buffer_size(&self) -> u64 {
        self.span_count as u64 * self.block_size
    }

    /// Segments a file of `file_size` bytes spans, rounding partial segments up
    pub fn segments_for_file_size(&self, file_size: u64) -> u64 {
        let data = file_size.saturating_sub(self.file_header_size());
        data.div_ceil(self.segment_size())
    }

    pub fn max_blocks(&self) -> u64 {
        self.segment_count()
            .saturating_mul(self.blocks_per_segment as u64)
    }

    pub fn max_data_size(&self) -> u64 {
        self.max_blocks().saturating_mul(self.block_size)
    }

    pub fn max_file_size(&self) -> u64 {
        self.segment_count()
            .saturating_mul(self.segment_size())
            .saturating_add(self.file_header_size())
    }
}
