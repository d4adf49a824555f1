// Benchmarks for the merged-metadata container format: writer-side
// merge (scratch files → header + bodies) and reader-side split
// (header + bodies → per-file cache entries).

use std::io::Cursor;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::TempDir;

use remote_fuse::archive::{
    split_merged_metadata, MetadataContainer, MERGED_HEADER_LEN, METADATA_FILENAMES,
};
use remote_fuse::cache::MetadataCache;

const ARCHIVE: &str = "550e8400-e29b-41d4-a716-446655440000";

/// Body sizes roughly shaped like a real archive: two dictionaries and
/// a database dominating four small files.
const BODY_SIZES: [usize; 6] = [256 * 1024, 16 * 1024, 4 * 1024, 512 * 1024, 128 * 1024, 16 * 1024];

fn build_merged_object() -> Vec<u8> {
    let mut object = Vec::new();
    let mut end = MERGED_HEADER_LEN as u32;
    for size in BODY_SIZES.iter().take(METADATA_FILENAMES.len() - 1) {
        end += *size as u32;
        object.extend_from_slice(&end.to_le_bytes());
    }
    for (i, size) in BODY_SIZES.iter().enumerate() {
        object.extend(std::iter::repeat(i as u8).take(*size));
    }
    object
}

fn bench_merge(c: &mut Criterion) {
    let scratch = TempDir::new().unwrap();
    let mut container = MetadataContainer::create(scratch.path(), ARCHIVE).unwrap();
    for (i, (filename, size)) in METADATA_FILENAMES.iter().copied().zip(BODY_SIZES).enumerate() {
        let body = vec![i as u8; size];
        container.open_for_writing(filename).unwrap();
        container.write(filename, &body, 0).unwrap();
        container.close(filename);
    }
    let total: usize = BODY_SIZES.iter().sum();

    let mut group = c.benchmark_group("merged");
    group.throughput(Throughput::Bytes(total as u64));
    group.bench_function("merge", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(total + MERGED_HEADER_LEN);
            container.merge_into(&mut out).unwrap();
            out
        })
    });
    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let object = build_merged_object();
    let total = object.len();

    let mut group = c.benchmark_group("merged");
    group.throughput(Throughput::Bytes(total as u64));
    group.bench_function("split", |b| {
        b.iter_batched(
            || TempDir::new().unwrap(),
            |cache_dir| {
                let cache = MetadataCache::new(cache_dir.path());
                split_merged_metadata(&mut Cursor::new(&object), ARCHIVE, &cache).unwrap();
                cache_dir
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_merge, bench_split);
criterion_main!(benches);
