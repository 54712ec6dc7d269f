//! Span-indexed free list
//!
//! Free runs are bucketed by span number (`length - 1`), each bucket sorted
//! by start block. Two maps index run boundaries so freeing can find and
//! merge neighbours without scanning:
//! - `begin`: start block -> span number
//! - `end`: last block -> start block
//!
//! No run is longer than `max_span + 1` blocks. Longer stretches of free
//! space are cut into max-length runs anchored at the high end, both when
//! building from a bitmap and when merging on free.

use crate::allocator::bitmap::FreeBlockMap;
use crate::allocator::BlockAllocator;
use crate::layout::Layout;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanAllocator {
    /// Run starts per span number, ascending
    spans: Vec<Vec<u32>>,

    begin: BTreeMap<u32, u32>,

    end: BTreeMap<u32, u32>,

    max_span: u32,

    total_blocks: u32,

    free_blocks: u32,
}

impl SpanAllocator {
    /// Empty index (no free blocks)
    pub fn new(total_blocks: u32, max_span: u32) -> Self {
        SpanAllocator {
            spans: vec![Vec::new(); max_span as usize + 1],
            begin: BTreeMap::new(),
            end: BTreeMap::new(),
            max_span,
            total_blocks,
            free_blocks: 0,
        }
    }

    /// Build the index for a fully free segment
    pub fn all_free(layout: &Layout) -> Self {
        Self::from_free_map(&FreeBlockMap::new(layout), layout)
    }

    pub fn max_span(&self) -> u32 {
        self.max_span
    }

    /// Number of free runs with the given span number
    pub fn class_len(&self, span_number: u32) -> usize {
        self.spans
            .get(span_number as usize)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Span number of the longest free run
    pub fn largest_span(&self) -> Option<u32> {
        (0..=self.max_span)
            .rev()
            .find(|&s| !self.spans[s as usize].is_empty())
    }

    /// All free runs as `(start_block, span_number)`, ascending by start
    pub fn free_runs(&self) -> Vec<(u32, u32)> {
        self.begin.iter().map(|(&start, &span)| (start, span)).collect()
    }

    fn insert(&mut self, start: u32, span: u32) {
        let class = &mut self.spans[span as usize];
        if let Err(pos) = class.binary_search(&start) {
            class.insert(pos, start);
        }
        self.begin.insert(start, span);
        self.end.insert(start + span, start);
    }

    fn remove(&mut self, start: u32, span: u32) {
        let class = &mut self.spans[span as usize];
        if let Ok(pos) = class.binary_search(&start) {
            class.remove(pos);
        }
        self.begin.remove(&start);
        self.end.remove(&(start + span));
    }
}

impl BlockAllocator for SpanAllocator {
    fn from_free_map(map: &FreeBlockMap, layout: &Layout) -> Self {
        let max_span = layout.max_span_number();
        let total_blocks = map.total_blocks();
        let mut alloc = SpanAllocator::new(total_blocks, max_span);

        // Scan downward so runs are capped from the high end. Starts are
        // pushed in descending order and each bucket is reversed afterwards.
        let record = |alloc: &mut SpanAllocator, start: u32, end: u32| {
            let span = end - start;
            alloc.spans[span as usize].push(start);
            alloc.begin.insert(start, span);
            alloc.end.insert(end, start);
            alloc.free_blocks += span + 1;
        };

        let mut run_end: Option<u32> = None;
        for block in (0..total_blocks).rev() {
            if map.is_free(block) {
                let end = *run_end.get_or_insert(block);
                if end - block == max_span {
                    record(&mut alloc, block, end);
                    run_end = None;
                }
            } else if let Some(end) = run_end.take() {
                record(&mut alloc, block + 1, end);
            }
        }
        if let Some(end) = run_end {
            record(&mut alloc, 0, end);
        }

        for class in alloc.spans.iter_mut() {
            class.reverse();
        }

        alloc
    }

    fn allocate(&mut self, span_number: u32) -> Option<u32> {
        if span_number > self.max_span {
            return None;
        }

        // First fit by size: the smallest non-empty bucket that is long enough
        let class = (span_number..=self.max_span).find(|&s| !self.spans[s as usize].is_empty())?;
        let start = self.spans[class as usize][0];
        self.remove(start, class);

        if class > span_number {
            self.insert(start + span_number + 1, class - span_number - 1);
        }

        self.free_blocks -= span_number + 1;
        Some(start)
    }

    fn free(&mut self, start_block: u32, span_number: u32) {
        let freed = span_number + 1;
        let mut start = start_block;
        let mut span = span_number;

        // Merge the run that begins right after us
        let high = start as u64 + span as u64 + 1;
        if high < self.total_blocks as u64 {
            if let Some(&high_span) = self.begin.get(&(high as u32)) {
                self.remove(high as u32, high_span);
                span += high_span + 1;
            }
        }

        // Merge the run that ends right before us
        if start > 0 {
            if let Some(&low_start) = self.end.get(&(start - 1)) {
                let low_span = start - 1 - low_start;
                self.remove(low_start, low_span);
                span += low_span + 1;
                start = low_start;
            }
        }

        while span > self.max_span {
            let chunk_start = start + span - self.max_span;
            self.insert(chunk_start, self.max_span);
            span -= self.max_span + 1;
        }
        self.insert(start, span);

        self.free_blocks += freed;
    }

    fn is_free(&self, block: u32) -> bool {
        self.begin
            .range(..=block)
            .next_back()
            .map(|(&start, &span)| block <= start + span)
            .unwrap_or(false)
    }

    fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    fn free_blocks(&self) -> u32 {
        self.free_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutConfig;

    fn default_layout() -> Layout {
        Layout::new(LayoutConfig::default()).unwrap()
    }

    #[test]
    fn test_fresh_segment_structure() {
        let layout = default_layout();
        let alloc = SpanAllocator::all_free(&layout);

        // 32752 blocks cut into runs of 16
        assert_eq!(alloc.class_len(15), 2047);
        for span in 0..15 {
            assert_eq!(alloc.class_len(span), 0);
        }
        assert_eq!(alloc.free_blocks(), 32752);
        assert_eq!(alloc.free_runs()[0], (0, 15));
        assert_eq!(alloc.free_runs()[2046], (32736, 15));
    }

    #[test]
    fn test_alloc_then_free_restores_structure() {
        let layout = default_layout();
        let fresh = SpanAllocator::all_free(&layout);

        for span in 0..=15 {
            let mut alloc = fresh.clone();
            let start = alloc.allocate(span).unwrap();
            assert_eq!(start, 0);
            assert_eq!(alloc.free_blocks(), 32752 - (span + 1));

            alloc.free(start, span);
            assert_eq!(alloc, fresh);
        }
    }

    #[test]
    fn test_three_single_blocks() {
        let layout = default_layout();
        let fresh = SpanAllocator::all_free(&layout);
        let mut alloc = fresh.clone();

        let a = alloc.allocate(0).unwrap();
        let b = alloc.allocate(0).unwrap();
        let c = alloc.allocate(0).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(alloc.class_len(15), 2046);
        assert_eq!(alloc.class_len(12), 1);

        alloc.free(a, 0);
        assert_eq!(alloc.class_len(0), 1);

        alloc.free(c, 0);
        assert_eq!(alloc.class_len(13), 1);
        assert_eq!(alloc.class_len(12), 0);

        alloc.free(b, 0);
        assert_eq!(alloc.class_len(15), 2047);
        assert_eq!(alloc, fresh);
    }

    #[test]
    fn test_free_order_does_not_matter() {
        let layout = default_layout();
        let fresh = SpanAllocator::all_free(&layout);

        for order in [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
            let mut alloc = fresh.clone();
            let blocks: Vec<u32> = (0..3).map(|_| alloc.allocate(0).unwrap()).collect();

            for i in order {
                alloc.free(blocks[i], 0);
            }
            assert_eq!(alloc, fresh, "order {:?}", order);
        }
    }

    #[test]
    fn test_first_fit_prefers_smallest_class() {
        let layout = default_layout();
        let mut alloc = SpanAllocator::all_free(&layout);

        // Leaves a 14-block remainder at 2..=15
        alloc.allocate(1).unwrap();

        // A 3-block request is served from that remainder, not a fresh run
        assert_eq!(alloc.allocate(2).unwrap(), 2);
        assert_eq!(alloc.class_len(15), 2046);
        assert_eq!(alloc.class_len(10), 1);
    }

    #[test]
    fn test_request_larger_than_max_span() {
        let layout = default_layout();
        let mut alloc = SpanAllocator::all_free(&layout);
        assert_eq!(alloc.allocate(16), None);
    }

    #[test]
    fn test_exhaustion() {
        let layout = default_layout();
        let mut alloc = SpanAllocator::all_free(&layout);

        for _ in 0..2047 {
            assert!(alloc.allocate(15).is_some());
        }
        assert_eq!(alloc.free_blocks(), 0);
        assert_eq!(alloc.allocate(0), None);
    }

    #[test]
    fn test_build_caps_runs_from_high_end() {
        let layout = default_layout();
        let mut map = FreeBlockMap::new(&layout);
        map.set_range(17, 32751, false);

        let alloc = SpanAllocator::from_free_map(&map, &layout);
        assert_eq!(alloc.free_runs(), vec![(0, 0), (1, 15)]);
        assert_eq!(alloc.free_blocks(), 17);
    }

    #[test]
    fn test_build_from_fragmented_map() {
        let layout = default_layout();
        let mut map = FreeBlockMap::new(&layout);
        map.set_range(0, 32751, false);
        map.set_range(3, 5, true);
        map.set_range(10, 10, true);
        map.set_range(32750, 32751, true);

        let alloc = SpanAllocator::from_free_map(&map, &layout);
        assert_eq!(alloc.free_runs(), vec![(3, 2), (10, 0), (32750, 1)]);
        assert!(alloc.is_free(4));
        assert!(!alloc.is_free(6));
        assert!(alloc.is_free(32751));
    }

    #[test]
    fn test_free_splits_long_merges() {
        let layout = default_layout();
        let mut alloc = SpanAllocator::all_free(&layout);

        let first = alloc.allocate(15).unwrap();
        let second = alloc.allocate(15).unwrap();
        let third = alloc.allocate(15).unwrap();
        assert_eq!((first, second, third), (0, 16, 32));

        alloc.free(first, 15);
        alloc.free(third, 15);
        // Merges with both neighbours into 48 blocks, cut into three runs
        alloc.free(second, 15);

        assert_eq!(alloc, SpanAllocator::all_free(&layout));
    }

    #[test]
    fn test_free_uneven_merge() {
        let layout = default_layout();
        let mut map = FreeBlockMap::new(&layout);
        map.set_range(0, 32751, false);
        let mut alloc = SpanAllocator::from_free_map(&map, &layout);

        alloc.free(0, 9);
        alloc.free(10, 9);

        // 20 free blocks: max run at the high end, remainder below
        assert_eq!(alloc.free_runs(), vec![(0, 3), (4, 15)]);
        assert_eq!(alloc.free_blocks(), 20);
    }

    #[test]
    fn test_last_block_has_no_high_neighbour() {
        let layout = default_layout();
        let mut map = FreeBlockMap::new(&layout);
        map.set_range(0, 32751, false);
        let mut alloc = SpanAllocator::from_free_map(&map, &layout);

        alloc.free(32751, 0);
        assert_eq!(alloc.free_runs(), vec![(32751, 0)]);
        assert_eq!(alloc.allocate(0), Some(32751));
    }
}
