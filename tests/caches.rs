// Tests for the attribute and readdir caches.
//
// Invariants:
//   - every listed path has a file entry whose size matches the listing
//     (modulo the streaming-extension override)
//   - every implied directory exists and yields exactly its direct
//     children, no duplicates, no transitive descendants
//   - ordered_read_pending transitions true → false exactly once

use remote_fuse::cache::{generate_caches_from_metadata, has_streaming_extension, AttrCache, ReaddirCache};

// ─────────────────────────────────────────────────────────────────────────────
// AttrCache
// ─────────────────────────────────────────────────────────────────────────────

/// Listed sizes are reported as-is for ordinary files.
#[test]
fn attr_cache_reports_listed_size() {
    let mut cache = AttrCache::new();
    cache.insert("/a/x.bin", 1024, false);

    let metadata = cache.get("/a/x.bin").unwrap();
    assert_eq!(metadata.size(), 1024);
    assert_eq!(metadata.reported_size("/a/x.bin"), 1024);
}

/// Compressed-stream extensions report size 0 so size-checking tools do
/// not truncate streaming reads.
#[test]
fn attr_cache_overrides_streaming_extensions() {
    let mut cache = AttrCache::new();
    cache.insert("/a/y.gz", 1_048_576, false);
    cache.insert("/a/y.zstd", 2048, false);
    cache.insert("/a/y.xz", 2048, false);

    for path in ["/a/y.gz", "/a/y.zstd", "/a/y.xz"] {
        assert!(has_streaming_extension(path));
        assert_eq!(cache.get(path).unwrap().reported_size(path), 0, "{path}");
    }
}

/// Relative paths are rooted on insert.
#[test]
fn attr_cache_roots_relative_paths() {
    let mut cache = AttrCache::new();
    cache.insert("a/x.bin", 10, false);
    assert!(cache.contains("/a/x.bin"));
}

/// Listing order is preserved for the pre-opener walk.
#[test]
fn attr_cache_preserves_listing_order() {
    let mut cache = AttrCache::new();
    for path in ["/c", "/a", "/b"] {
        cache.insert(path, 1, true);
    }
    let order: Vec<&str> = cache.paths_in_listing_order().collect();
    assert_eq!(order, ["/c", "/a", "/b"]);
}

/// The pending flag clears exactly once and stays cleared.
#[test]
fn ordered_read_pending_clears_once() {
    let mut cache = AttrCache::new();
    cache.insert("/a", 1, true);

    assert!(cache.get("/a").unwrap().ordered_read_pending());
    cache.clear_ordered_read_pending("/a");
    assert!(!cache.get("/a").unwrap().ordered_read_pending());
    cache.clear_ordered_read_pending("/a");
    assert!(!cache.get("/a").unwrap().ordered_read_pending());
}

/// Unknown paths are absent, not synthesized.
#[test]
fn attr_cache_misses_are_none() {
    let cache = AttrCache::new();
    assert!(cache.get("/nope").is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// ReaddirCache
// ─────────────────────────────────────────────────────────────────────────────

/// Intermediate directories are created along each inserted path.
#[test]
fn readdir_cache_creates_intermediate_directories() {
    let mut cache = ReaddirCache::new();
    cache.add_file("/a/b/c.bin");

    assert!(cache.contains("/"));
    assert!(cache.contains("/a"));
    assert!(cache.contains("/a/b"));
    assert!(!cache.contains("/a/b/c.bin"));
}

/// Each directory yields exactly its direct children.
#[test]
fn readdir_cache_yields_direct_children_only() {
    let mut cache = ReaddirCache::new();
    cache.add_file("/a/b/c.bin");
    cache.add_file("/a/d.bin");
    cache.add_file("/top.bin");

    let root = cache.node("/").unwrap();
    assert_eq!(root.directory_names().collect::<Vec<_>>(), ["a"]);
    assert_eq!(root.files().collect::<Vec<_>>(), ["top.bin"]);

    let a = cache.node("/a").unwrap();
    assert_eq!(a.directory_names().collect::<Vec<_>>(), ["b"]);
    assert_eq!(a.files().collect::<Vec<_>>(), ["d.bin"]);

    let b = cache.node("/a/b").unwrap();
    assert_eq!(b.directory_names().count(), 0);
    assert_eq!(b.files().collect::<Vec<_>>(), ["c.bin"]);
}

/// Re-inserting paths does not duplicate children.
#[test]
fn readdir_cache_deduplicates() {
    let mut cache = ReaddirCache::new();
    cache.add_file("/a/x");
    cache.add_file("/a/x");
    cache.add_file("/a/y");

    let a = cache.node("/a").unwrap();
    assert_eq!(a.files().collect::<Vec<_>>(), ["x", "y"]);
    let root = cache.node("/").unwrap();
    assert_eq!(root.directory_names().collect::<Vec<_>>(), ["a"]);
}

/// Unknown directories are misses.
#[test]
fn readdir_cache_unknown_directory_is_absent() {
    let cache = ReaddirCache::new();
    assert!(!cache.contains("/missing"));
    assert!(cache.node("/missing").is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Manifest-driven construction
// ─────────────────────────────────────────────────────────────────────────────

/// Both caches agree when built from a known manifest.
#[test]
fn caches_from_metadata_cover_all_entries() {
    let entries = vec![
        ("/arch/logtype.dict".to_string(), 12u64),
        ("/arch/s/0".to_string(), 4096u64),
    ];
    let (attr_cache, readdir_cache) = generate_caches_from_metadata(entries, true);

    assert_eq!(attr_cache.len(), 2);
    assert!(attr_cache.get("/arch/s/0").is_some());
    assert!(readdir_cache.contains("/arch/s"));
    assert!(attr_cache.get("/arch/logtype.dict").unwrap().ordered_read_pending());
}
