use blockfile_rs::{BlockFile, LayoutConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");

    for size in [512usize, 4096, 16 * 1024, 64 * 1024] {
        let dir = tempdir().unwrap();
        let mut file = BlockFile::create(dir.path().join("store.blk"), LayoutConfig::default()).unwrap();
        let data = vec![0xABu8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let handle = file.store(black_box(data), None).unwrap();
                file.release(&handle).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_overwrite_in_place(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut file = BlockFile::create(dir.path().join("overwrite.blk"), LayoutConfig::default()).unwrap();
    let data = vec![0xCDu8; 16 * 1024];
    let handle = file.store(&data, None).unwrap();

    c.bench_function("store_existing_handle", |b| {
        b.iter(|| black_box(file.store(&data, Some(&handle)).unwrap()));
    });
}

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");

    for size in [4096usize, 64 * 1024] {
        let dir = tempdir().unwrap();
        let mut file = BlockFile::create(dir.path().join("load.blk"), LayoutConfig::default()).unwrap();
        let handles: Vec<_> = (0..64)
            .map(|i| file.store(&vec![i as u8; size], None).unwrap())
            .collect();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &handles, |b, handles| {
            let mut i = 0;
            b.iter(|| {
                let data = file.load(&handles[i % handles.len()]).unwrap();
                i += 1;
                black_box(data)
            });
        });
    }

    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut file = BlockFile::create(dir.path().join("flush.blk"), LayoutConfig::default()).unwrap();

    c.bench_function("flush_one_dirty_segment", |b| {
        b.iter(|| {
            let handle = file.store(b"dirty", None).unwrap();
            file.release(&handle).unwrap();
            file.flush().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_store,
    bench_overwrite_in_place,
    bench_load,
    bench_flush
);
criterion_main!(benches);
