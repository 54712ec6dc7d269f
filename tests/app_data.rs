//! Application data stored in the file header

use blockfile_rs::{BlockFile, BlockFileError, LayoutConfig};
use tempfile::tempdir;

#[test]
fn test_app_data_round_trip_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("appdata.blk");

    {
        let mut file = BlockFile::create(&path, LayoutConfig::default()).unwrap();
        let root = file.store(b"catalog", None).unwrap();
        file.set_app_data(root.to_string().into_bytes()).unwrap();
        file.close().unwrap();
    }

    let file = BlockFile::open(&path, LayoutConfig::default()).unwrap();
    let root_text = String::from_utf8(file.app_data().to_vec()).unwrap();
    let root = root_text.parse().unwrap();
    assert_eq!(&file.load(&root).unwrap()[..7], b"catalog");
}

#[test]
fn test_app_data_at_capacity() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("full.blk");

    let max = {
        let mut file = BlockFile::create(&path, LayoutConfig::default()).unwrap();
        let max = file.max_app_data_len().unwrap();
        let data: Vec<u8> = (0..max).map(|i| (i % 251) as u8).collect();
        file.set_app_data(data).unwrap();
        file.close().unwrap();
        max
    };

    let file = BlockFile::open(&path, LayoutConfig::default()).unwrap();
    assert_eq!(file.app_data().len(), max);
    assert!(file
        .app_data()
        .iter()
        .enumerate()
        .all(|(i, &b)| b == (i % 251) as u8));
}

#[test]
fn test_oversize_app_data_rejected() {
    let dir = tempdir().unwrap();
    let mut file = BlockFile::create(dir.path().join("big.blk"), LayoutConfig::default()).unwrap();
    file.set_app_data(b"keep".to_vec()).unwrap();

    let max = file.max_app_data_len().unwrap();
    match file.set_app_data(vec![0u8; max + 1]) {
        Err(BlockFileError::AppDataTooLarge { len, max: limit }) => {
            assert_eq!(len, max + 1);
            assert_eq!(limit, max);
        }
        other => panic!("expected AppDataTooLarge, got {:?}", other.err()),
    }

    // Never truncated or partially applied
    assert_eq!(file.app_data(), b"keep");
}

#[test]
fn test_smaller_blocks_leave_less_room() {
    let dir = tempdir().unwrap();
    let small = BlockFile::create(
        dir.path().join("small.blk"),
        LayoutConfig::new().with_block_size_exp(9),
    )
    .unwrap();
    let large = BlockFile::create(dir.path().join("large.blk"), LayoutConfig::default()).unwrap();

    assert!(small.max_app_data_len().unwrap() < 512);
    assert!(large.max_app_data_len().unwrap() > small.max_app_data_len().unwrap());
}
