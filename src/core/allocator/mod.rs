//! Free space management for segments
//!
//! Every segment keeps two views of its free space:
//! - [`bitmap::FreeBlockMap`] - the persisted bit-per-block map
//! - a [`BlockAllocator`] - an in-memory index rebuilt from the bitmap on
//!   load and used to find runs quickly
//!
//! The default allocator is [`span::SpanAllocator`], a free list indexed by
//! run length with neighbour coalescing.

pub mod bitmap;
pub mod span;

use crate::allocator::bitmap::FreeBlockMap;
use crate::layout::Layout;

/// Block allocator trait
///
/// Runs are described by their first block and span number (`blocks - 1`).
/// Allocators only index free space; validating frees against the bitmap is
/// the caller's job.
pub trait BlockAllocator {
    /// Build the index from a free map in one pass
    fn from_free_map(map: &FreeBlockMap, layout: &Layout) -> Self
    where
        Self: Sized;

    /// Reserve `span_number + 1` contiguous blocks, returning the first one
    ///
    /// `None` when no free run is long enough.
    fn allocate(&mut self, span_number: u32) -> Option<u32>;

    /// Return a run of blocks to the free index
    fn free(&mut self, start_block: u32, span_number: u32);

    /// Whether a block is inside an indexed free run
    fn is_free(&self, block: u32) -> bool;

    /// Get total number of blocks managed
    fn total_blocks(&self) -> u32;

    /// Get number of free blocks available
    fn free_blocks(&self) -> u32;
}
