//! Block handles
//!
//! A handle names a contiguous run of blocks inside one segment:
//! `(segment_number, start_block, span_number)` where the run holds
//! `span_number + 1` blocks. Handles carry the layout config they were
//! minted under, so a handle from a differently shaped file never compares
//! equal to a native one.
//!
//! ## Binary form (32-bit layouts)
//!
//! ```text
//! | span | start_block | segment_number |
//!   high                          bit 0
//! ```
//!
//! ## Text form
//!
//! `"{segment}/{start}/{span}{layout-json}"`, e.g.
//! `3/1111/0{"block_size_exp":12,...}`.

use crate::error::{BlockFileError, Result};
use crate::layout::{Layout, LayoutConfig};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    segment_number: u64,
    start_block: u32,
    span_number: u32,
    config: LayoutConfig,
}

impl Handle {
    /// Build a handle, checking each field against the layout
    pub fn new(
        segment_number: u64,
        start_block: u32,
        span_number: u32,
        layout: &Layout,
    ) -> Result<Self> {
        if !layout.is_valid_segment_number(segment_number) {
            return Err(BlockFileError::InvalidHandleField {
                field: "segment_number",
                value: segment_number,
                max: layout.max_segment_number(),
            });
        }
        if !layout.is_valid_block_number(start_block) {
            return Err(BlockFileError::InvalidHandleField {
                field: "start_block",
                value: start_block as u64,
                max: layout.max_block_number() as u64,
            });
        }
        if !layout.is_valid_span_number(span_number) {
            return Err(BlockFileError::InvalidHandleField {
                field: "span_number",
                value: span_number as u64,
                max: layout.max_span_number() as u64,
            });
        }

        Ok(Handle {
            segment_number,
            start_block,
            span_number,
            config: *layout.config(),
        })
    }

    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    pub fn start_block(&self) -> u32 {
        self.start_block
    }

    pub fn span_number(&self) -> u32 {
        self.span_number
    }

    /// Last block of the run
    pub fn end_block(&self) -> u64 {
        self.start_block as u64 + self.span_number as u64
    }

    pub fn block_count(&self) -> u32 {
        self.span_number + 1
    }

    /// Layout config the handle was created under
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Capacity of the run in bytes
    pub fn size_bytes(&self) -> u64 {
        self.block_count() as u64 * (1u64 << self.config.block_size_exp)
    }

    /// Whether the handle was minted under `layout`
    pub fn belongs_to(&self, layout: &Layout) -> bool {
        self.config == *layout.config()
    }

    /// Pack into an unsigned integer
    ///
    /// Only 32-bit layouts have a binary form; 64-bit layouts return
    /// [`BlockFileError::UnsupportedHandleWidth`].
    pub fn encode(&self) -> Result<u32> {
        let layout = Layout::new(self.config)?;
        if layout.handle_bits() != 32 {
            return Err(BlockFileError::UnsupportedHandleWidth(layout.handle_bits()));
        }

        let value = (self.segment_number << layout.segment_shift())
            | ((self.start_block as u64) << layout.block_shift())
            | ((self.span_number as u64) << layout.span_shift());

        Ok(value as u32)
    }

    /// Unpack a value produced by [`Handle::encode`]
    pub fn decode(value: u32, layout: &Layout) -> Result<Self> {
        if layout.handle_bits() != 32 {
            return Err(BlockFileError::UnsupportedHandleWidth(layout.handle_bits()));
        }

        let value = value as u64;
        let segment_number = (value >> layout.segment_shift()) & layout.segment_mask();
        let start_block = (value >> layout.block_shift()) & layout.block_mask();
        let span_number = (value >> layout.span_shift()) & layout.span_mask();

        Handle::new(
            segment_number,
            start_block as u32,
            span_number as u32,
            layout,
        )
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.config).map_err(|_| fmt::Error)?;
        write!(
            f,
            "{}/{}/{}{}",
            self.segment_number, self.start_block, self.span_number, json
        )
    }
}

impl FromStr for Handle {
    type Err = BlockFileError;

    fn from_str(s: &str) -> Result<Self> {
        let brace = s
            .find('{')
            .ok_or_else(|| BlockFileError::InvalidHandle(format!("missing layout in {:?}", s)))?;
        let (fields, json) = s.split_at(brace);

        let mut parts = fields.split('/');
        let mut next = |name: &str| -> Result<u64> {
            parts
                .next()
                .and_then(|p| p.trim().parse::<u64>().ok())
                .ok_or_else(|| BlockFileError::InvalidHandle(format!("bad {} in {:?}", name, s)))
        };
        let segment_number = next("segment_number")?;
        let start_block = next("start_block")?;
        let span_number = next("span_number")?;
        if parts.next().is_some() {
            return Err(BlockFileError::InvalidHandle(format!(
                "too many fields in {:?}",
                s
            )));
        }

        let config: LayoutConfig = serde_json::from_str(json)
            .map_err(|e| BlockFileError::InvalidHandle(format!("bad layout: {}", e)))?;
        let layout = Layout::new(config)?;

        let start_block = u32::try_from(start_block).map_err(|_| {
            BlockFileError::InvalidHandleField {
                field: "start_block",
                value: start_block,
                max: layout.max_block_number() as u64,
            }
        })?;
        let span_number = u32::try_from(span_number).map_err(|_| {
            BlockFileError::InvalidHandleField {
                field: "span_number",
                value: span_number,
                max: layout.max_span_number() as u64,
            }
        })?;

        Handle::new(segment_number, start_block, span_number, &layout)
    }
}
