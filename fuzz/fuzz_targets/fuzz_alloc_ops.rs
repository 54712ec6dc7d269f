#![no_main]
use arbitrary::Arbitrary;
use blockfile_rs::{Handle, Layout, LayoutConfig, Segment};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Debug, Arbitrary)]
enum Op {
    Reserve(u8),
    Release(u16),
    ReleaseTwice(u16),
}

fuzz_target!(|ops: Vec<Op>| {
    let layout = match Layout::new(LayoutConfig::new().with_block_size_exp(9)) {
        Ok(layout) => Arc::new(layout),
        Err(_) => return,
    };
    let total = layout.blocks_per_segment();
    let mut seg: Segment = match Segment::new(0, layout.clone()) {
        Ok(seg) => seg,
        Err(_) => return,
    };
    let mut live: Vec<Handle> = Vec::new();

    for op in ops.into_iter().take(2048) {
        match op {
            Op::Reserve(n) => {
                let count = n as u32 % layout.span_count() + 1;
                if let Ok(Some(handle)) = seg.reserve(count) {
                    live.push(handle);
                }
            }
            Op::Release(i) if !live.is_empty() => {
                let handle = live.swap_remove(i as usize % live.len());
                assert!(seg.release(&handle).is_ok());
            }
            Op::ReleaseTwice(i) if !live.is_empty() => {
                let handle = live.swap_remove(i as usize % live.len());
                assert!(seg.release(&handle).is_ok());
                let before = seg.clone();
                assert!(seg.release(&handle).is_err());
                assert_eq!(seg, before);
            }
            _ => {}
        }

        let used: u32 = live.iter().map(|h| h.block_count()).sum();
        assert_eq!(seg.free_blocks() + used, total);
        assert_eq!(seg.free_map().free_blocks(), seg.free_blocks());
    }
});
