//! Concurrent readers/writers stress tests

use blockfile_rs::{BlockFile, Handle, LayoutConfig};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn payload(tag: u32) -> Vec<u8> {
    let mut data = tag.to_be_bytes().to_vec();
    data.resize(1500 + (tag as usize % 7) * 1000, (tag % 251) as u8);
    data
}

fn check(file: &BlockFile, handle: &Handle, tag: u32) {
    let expected = payload(tag);
    let data = file.load(handle).unwrap();
    assert_eq!(&data[..expected.len()], &expected[..]);
}

#[test]
fn test_10_concurrent_readers_2_writers() {
    let dir = tempdir().unwrap();
    let file = Arc::new(RwLock::new(
        BlockFile::create(dir.path().join("stress.blk"), LayoutConfig::default()).unwrap(),
    ));

    // Pre-populate
    let seeded: Arc<Vec<(Handle, u32)>> = {
        let mut f = file.write();
        Arc::new(
            (0..50u32)
                .map(|tag| (f.store(&payload(tag), None).unwrap(), tag))
                .collect(),
        )
    };

    let threads: Vec<_> = (0..12u32)
        .map(|thread_id| {
            let file = file.clone();
            let seeded = seeded.clone();
            std::thread::spawn(move || {
                if thread_id < 2 {
                    // Writer thread
                    let mut written = Vec::new();
                    for i in 0..100u32 {
                        let tag = 1000 + thread_id * 1000 + i;
                        let handle = file.write().store(&payload(tag), None).unwrap();
                        written.push((handle, tag));
                    }
                    written
                } else {
                    // Reader thread
                    for _ in 0..500 {
                        let idx = rand::random::<usize>() % seeded.len();
                        let (handle, tag) = &seeded[idx];
                        check(&file.read(), handle, *tag);
                    }
                    Vec::new()
                }
            })
        })
        .collect();

    let mut written = Vec::new();
    for t in threads {
        written.extend(t.join().unwrap());
    }

    // Verify integrity
    let f = file.read();
    assert_eq!(written.len(), 200);
    for (handle, tag) in seeded.iter().chain(written.iter()) {
        check(&f, handle, *tag);
    }
}

#[test]
fn test_shared_loads_without_write_lock() {
    let dir = tempdir().unwrap();
    let mut file = BlockFile::create(dir.path().join("shared.blk"), LayoutConfig::default()).unwrap();
    let handles: Vec<_> = (0..64u32)
        .map(|tag| (file.store(&payload(tag), None).unwrap(), tag))
        .collect();

    // Loads take &self, so a plain Arc is enough for readers
    let file = Arc::new(file);
    let loads = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let file = file.clone();
            let handles = handles.clone();
            let loads = loads.clone();
            std::thread::spawn(move || {
                for (handle, tag) in handles.iter().rev() {
                    check(&file, handle, *tag);
                    loads.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(loads.load(Ordering::Relaxed), 8 * 64);
}

#[test]
fn test_concurrent_store_release_keeps_accounting() {
    let dir = tempdir().unwrap();
    let file = Arc::new(RwLock::new(
        BlockFile::create(dir.path().join("churn.blk"), LayoutConfig::default()).unwrap(),
    ));

    let threads: Vec<_> = (0..4u32)
        .map(|thread_id| {
            let file = file.clone();
            std::thread::spawn(move || {
                let mut kept = Vec::new();
                for i in 0..200u32 {
                    let tag = thread_id * 10_000 + i;
                    let handle = file.write().store(&payload(tag), None).unwrap();
                    if i % 3 == 0 {
                        file.write().release(&handle).unwrap();
                    } else {
                        kept.push((handle, tag));
                    }
                }
                kept
            })
        })
        .collect();

    let mut kept = Vec::new();
    for t in threads {
        kept.extend(t.join().unwrap());
    }

    let f = file.read();
    let used: u64 = kept.iter().map(|(h, _)| h.block_count() as u64).sum();
    assert_eq!(f.stats().used_blocks, used);
    for (handle, tag) in &kept {
        check(&f, handle, *tag);
    }
}
