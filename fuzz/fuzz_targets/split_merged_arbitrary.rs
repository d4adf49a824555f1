#![no_main]
use libfuzzer_sys::fuzz_target;

use std::io::Cursor;

use remote_fuse::archive::split_merged_metadata;
use remote_fuse::cache::MetadataCache;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes through the merged-metadata parser. Err
    // results are expected and fine; what we verify is no panics and no
    // runaway allocations from hostile offset headers.
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let cache = MetadataCache::new(dir.path());
    let _ = split_merged_metadata(&mut Cursor::new(data), "fuzz-archive", &cache);
});
