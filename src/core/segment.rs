//! Segments: a free map header followed by a fixed number of blocks
//!
//! On disk a segment starts with two copies of its free map (primary, then
//! secondary) and continues with `blocks_per_segment` data blocks. In memory
//! it keeps the bitmap, an allocator index built from it, and a dirty flag
//! that tells the file to persist the header on the next flush.

use crate::allocator::bitmap::FreeBlockMap;
use crate::allocator::span::SpanAllocator;
use crate::allocator::BlockAllocator;
use crate::error::{BlockFileError, Result};
use crate::handle::Handle;
use crate::layout::Layout;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<A = SpanAllocator> {
    segment_number: u64,
    free_map: FreeBlockMap,
    allocator: A,
    dirty: bool,
    layout: Arc<Layout>,
}

impl<A: BlockAllocator> Segment<A> {
    /// Fresh, fully free segment
    ///
    /// New segments start dirty so their header is written before the file
    /// header ever counts them.
    pub fn new(segment_number: u64, layout: Arc<Layout>) -> Result<Self> {
        let free_map = FreeBlockMap::new(&layout);
        let mut segment = Self::from_free_map(segment_number, free_map, layout)?;
        segment.dirty = true;
        Ok(segment)
    }

    /// Segment backed by a free map read from disk
    pub fn from_free_map(
        segment_number: u64,
        free_map: FreeBlockMap,
        layout: Arc<Layout>,
    ) -> Result<Self> {
        if !layout.is_valid_segment_number(segment_number) {
            return Err(BlockFileError::InvalidHandleField {
                field: "segment_number",
                value: segment_number,
                max: layout.max_segment_number(),
            });
        }

        let allocator = A::from_free_map(&free_map, &layout);
        Ok(Segment {
            segment_number,
            free_map,
            allocator,
            dirty: false,
            layout,
        })
    }

    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn free_map(&self) -> &FreeBlockMap {
        &self.free_map
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn free_blocks(&self) -> u32 {
        self.allocator.free_blocks()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Reserve `block_count` contiguous blocks
    ///
    /// Returns `Ok(None)` when no free run is long enough.
    pub fn reserve(&mut self, block_count: u32) -> Result<Option<Handle>> {
        if block_count == 0 || block_count > self.layout.span_count() {
            return Err(BlockFileError::InvalidHandleField {
                field: "block_count",
                value: block_count as u64,
                max: self.layout.span_count() as u64,
            });
        }

        let span_number = block_count - 1;
        let start = match self.allocator.allocate(span_number) {
            Some(start) => start,
            None => return Ok(None),
        };

        let handle = match Handle::new(self.segment_number, start, span_number, &self.layout) {
            Ok(handle) => handle,
            Err(e) => {
                self.allocator.free(start, span_number);
                return Err(e);
            }
        };

        self.free_map.set_range(start, start + span_number, false);
        self.dirty = true;

        Ok(Some(handle))
    }

    /// Whether every block of the handle is currently allocated here
    pub fn is_reserved(&self, handle: &Handle) -> bool {
        handle.belongs_to(&self.layout)
            && handle.segment_number() == self.segment_number
            && handle.end_block() <= self.layout.max_block_number() as u64
            && self
                .free_map
                .range_is(handle.start_block(), handle.end_block() as u32, false)
    }

    /// Return a handle's blocks to the free pool
    ///
    /// Nothing is modified unless every block of the run is currently in use.
    pub fn release(&mut self, handle: &Handle) -> Result<()> {
        if !handle.belongs_to(&self.layout) {
            return Err(BlockFileError::InvalidRelease(format!(
                "handle {} uses a different layout",
                handle
            )));
        }
        if handle.segment_number() != self.segment_number {
            return Err(BlockFileError::InvalidRelease(format!(
                "handle names segment {}, not {}",
                handle.segment_number(),
                self.segment_number
            )));
        }
        if handle.end_block() > self.layout.max_block_number() as u64 {
            return Err(BlockFileError::InvalidRelease(format!(
                "run {}..={} overruns segment {}",
                handle.start_block(),
                handle.end_block(),
                self.segment_number
            )));
        }

        let start = handle.start_block();
        let end = handle.end_block() as u32;
        if !self.free_map.range_is(start, end, false) {
            return Err(BlockFileError::InvalidRelease(format!(
                "blocks {}..={} of segment {} are not all allocated",
                start, end, self.segment_number
            )));
        }

        self.free_map.set_range(start, end, true);
        self.allocator.free(start, handle.span_number());
        self.dirty = true;

        Ok(())
    }

    /// Free map bytes with a fresh checksum, ready to write to both copies
    pub fn header_bytes(&mut self) -> Vec<u8> {
        self.free_map.signed_bytes().to_vec()
    }
}

impl<A: BlockAllocator> fmt::Display for Segment<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "segment {} ({}/{} blocks free{})",
            self.segment_number,
            self.allocator.free_blocks(),
            self.allocator.total_blocks(),
            if self.dirty { ", dirty" } else { "" }
        )
    }
}
