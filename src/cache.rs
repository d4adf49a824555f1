//! In-memory attribute / directory caches and the disk-backed metadata
//! cache.
//!
//! The attribute and readdir caches are built once, before the FUSE loop
//! starts, by a paginated listing of the configured prefix (or from an
//! already known manifest). They are never mutated afterwards except for
//! the one-way `ordered_read_pending` flag, so the mount thread and the
//! pre-opener can share them without locking.

pub mod attr;
pub mod disk;
pub mod readdir;

pub use attr::{has_streaming_extension, AttrCache, FileMetadata};
pub use disk::MetadataCache;
pub use readdir::{DirectoryNode, ReaddirCache};

use crate::error::Result;
use crate::s3path::S3MountConfig;
use crate::store::Connection;

/// Builds both caches from a paginated listing of the mount's prefix.
pub fn generate_caches(
    config: &S3MountConfig,
    connection: &Connection,
    using_ordered_reads: bool,
) -> Result<(AttrCache, ReaddirCache)> {
    let mut attr_cache = AttrCache::new();
    let mut readdir_cache = ReaddirCache::new();

    for (key, size) in connection.list_objects(config.key_prefix())? {
        let fuse_path = config.fuse_path_for_key(&key)?;
        readdir_cache.add_file(&fuse_path);
        attr_cache.insert(&fuse_path, size, using_ordered_reads);
    }
    Ok((attr_cache, readdir_cache))
}

/// Builds both caches from an already known `(path, size)` manifest,
/// skipping the listing round-trip.
pub fn generate_caches_from_metadata(
    entries: impl IntoIterator<Item = (String, u64)>,
    using_ordered_reads: bool,
) -> (AttrCache, ReaddirCache) {
    let mut attr_cache = AttrCache::new();
    let mut readdir_cache = ReaddirCache::new();

    for (fuse_path, size) in entries {
        readdir_cache.add_file(&fuse_path);
        attr_cache.insert(&fuse_path, size, using_ordered_reads);
    }
    (attr_cache, readdir_cache)
}
