// Tests for merged-metadata decomposition and the write → read
// round-trip of the full container format.

use std::io::Cursor;

use remote_fuse::archive::{
    split_merged_metadata, MetadataContainer, MERGED_HEADER_LEN, METADATA_FILENAMES,
};
use remote_fuse::cache::MetadataCache;
use tempfile::TempDir;

const ARCHIVE: &str = "550e8400-e29b-41d4-a716-446655440000";

fn merged_object(bodies: &[&[u8]; 6]) -> Vec<u8> {
    let mut object = Vec::new();
    let mut end = MERGED_HEADER_LEN as u32;
    for body in bodies.iter().take(5) {
        end += body.len() as u32;
        object.extend_from_slice(&end.to_le_bytes());
    }
    for body in bodies {
        object.extend_from_slice(body);
    }
    object
}

/// Each canonical file lands in the cache under /<archive>/<name> with
/// exactly its body bytes; the last file takes the remainder.
#[test]
fn split_populates_cache_in_canonical_order() {
    let dir = TempDir::new().unwrap();
    let cache = MetadataCache::new(dir.path());
    let bodies: [&[u8]; 6] = [b"logtypes", b"seg", b"meta", b"database", b"vars", b"varseg"];

    let mut reader = Cursor::new(merged_object(&bodies));
    split_merged_metadata(&mut reader, ARCHIVE, &cache).unwrap();

    for (filename, body) in METADATA_FILENAMES.iter().zip(&bodies) {
        let key = format!("/{ARCHIVE}/{filename}");
        assert_eq!(cache.size_of(&key), Some(body.len() as u64), "{filename}");
        let stored = cache.read_at(&key, 0, body.len()).unwrap().unwrap();
        assert_eq!(&stored, body, "{filename}");
    }
}

/// Header `[12, 20, 28, 36, 44]`-style arithmetic: a read of the first
/// file returns the bytes immediately after the 20-byte header.
#[test]
fn first_file_starts_after_header() {
    let dir = TempDir::new().unwrap();
    let cache = MetadataCache::new(dir.path());
    let bodies: [&[u8]; 6] = [b"12345678", b"x", b"y", b"z", b"v", b"w"];
    let object = merged_object(&bodies);
    assert_eq!(&object[MERGED_HEADER_LEN..MERGED_HEADER_LEN + 8], b"12345678");

    let mut reader = Cursor::new(object);
    split_merged_metadata(&mut reader, ARCHIVE, &cache).unwrap();

    let key = format!("/{ARCHIVE}/logtype.dict");
    let head = cache.read_at(&key, 0, 8).unwrap().unwrap();
    assert_eq!(head, b"12345678");
}

/// Writing through the container and splitting the result reproduces
/// every body byte-for-byte.
#[test]
fn container_merge_then_split_round_trips() {
    let scratch = TempDir::new().unwrap();
    let bodies: [&[u8]; 6] = [
        b"logtype dictionary",
        b"logtype segment index",
        b"archive metadata",
        b"sqlite database bytes",
        b"variable dictionary",
        b"variable segment index",
    ];
    let mut container = MetadataContainer::create(scratch.path(), ARCHIVE).unwrap();
    for (filename, body) in METADATA_FILENAMES.iter().copied().zip(bodies.iter().copied()) {
        container.open_for_writing(filename).unwrap();
        container.write(filename, body, 0).unwrap();
        container.close(filename);
    }
    let mut merged = Vec::new();
    container.merge_into(&mut merged).unwrap();

    let cache_dir = TempDir::new().unwrap();
    let cache = MetadataCache::new(cache_dir.path());
    split_merged_metadata(&mut Cursor::new(merged), ARCHIVE, &cache).unwrap();

    for (filename, body) in METADATA_FILENAMES.iter().zip(&bodies) {
        let key = format!("/{ARCHIVE}/{filename}");
        let stored = cache.read_at(&key, 0, body.len() + 8).unwrap().unwrap();
        assert_eq!(&stored, body, "{filename}");
    }
}

/// Truncated headers surface as errors, not hangs.
#[test]
fn truncated_header_is_an_error() {
    let dir = TempDir::new().unwrap();
    let cache = MetadataCache::new(dir.path());
    let mut reader = Cursor::new(vec![0u8; MERGED_HEADER_LEN - 1]);
    assert!(split_merged_metadata(&mut reader, ARCHIVE, &cache).is_err());
}

/// Non-monotonic offsets surface as errors.
#[test]
fn non_monotonic_offsets_are_an_error() {
    let dir = TempDir::new().unwrap();
    let cache = MetadataCache::new(dir.path());

    let mut object = Vec::new();
    for end in [30u32, 10, 40, 50, 60] {
        object.extend_from_slice(&end.to_le_bytes());
    }
    object.extend_from_slice(&[0u8; 64]);
    assert!(split_merged_metadata(&mut Cursor::new(object), ARCHIVE, &cache).is_err());
}

/// A body shorter than its recorded range surfaces as an error.
#[test]
fn truncated_body_is_an_error() {
    let dir = TempDir::new().unwrap();
    let cache = MetadataCache::new(dir.path());

    let mut object = Vec::new();
    for end in [120u32, 130, 140, 150, 160] {
        object.extend_from_slice(&end.to_le_bytes());
    }
    object.extend_from_slice(&[7u8; 10]); // far short of offset 120
    assert!(split_merged_metadata(&mut Cursor::new(object), ARCHIVE, &cache).is_err());
}
