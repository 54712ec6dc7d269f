#![no_main]
use arbitrary::Arbitrary;
use blockfile_rs::{BlockFile, LayoutConfig};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Damage {
    /// (offset, xor mask) pairs applied to a freshly written file
    flips: Vec<(u16, u8)>,
    truncate_to: Option<u16>,
}

// Opening a damaged file may fail, but must never panic
fuzz_target!(|damage: Damage| {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let path = dir.path().join("fuzz.blk");
    let config = LayoutConfig::new().with_block_size_exp(9);

    {
        let mut file = match BlockFile::create(&path, config) {
            Ok(file) => file,
            Err(_) => return,
        };
        let _ = file.set_app_data(b"fuzz".to_vec());
        for i in 0..4u8 {
            let _ = file.store(&vec![i; 700], None);
        }
        let _ = file.close();
    }

    let mut bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(_) => return,
    };
    for (offset, mask) in damage.flips.iter().take(32) {
        let idx = *offset as usize % bytes.len();
        bytes[idx] ^= mask;
    }
    if let Some(len) = damage.truncate_to {
        bytes.truncate(len as usize);
    }
    if std::fs::write(&path, &bytes).is_err() {
        return;
    }

    if let Ok(file) = BlockFile::open(&path, config) {
        for segment in file.segments() {
            assert!(segment.free_blocks() <= file.layout().blocks_per_segment());
        }
        let _ = file.stats();
    }
});
