//! File-attribute cache populated from the initial listing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use nix::unistd::{getgid, getuid};

/// Extensions whose files report `st_size = 0` so that size-checking
/// tools do not truncate streaming reads; the real end of data is
/// discovered by reading to EOF.
const STREAMING_EXTENSIONS: [&str; 3] = [".gz", ".zstd", ".xz"];

pub fn has_streaming_extension(fuse_path: &str) -> bool {
    STREAMING_EXTENSIONS
        .iter()
        .any(|extension| fuse_path.ends_with(extension))
}

/// Per-file listing metadata.
pub struct FileMetadata {
    size: u64,
    /// Set while the file is expected to be served by the pre-opener.
    /// Transitions `true → false` exactly once, on first open.
    ordered_read_pending: AtomicBool,
}

impl FileMetadata {
    fn new(size: u64, ordered_read_pending: bool) -> Self {
        FileMetadata {
            size,
            ordered_read_pending: AtomicBool::new(ordered_read_pending),
        }
    }

    /// Listed object size, before any extension-based override.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size to report through `getattr`.
    pub fn reported_size(&self, fuse_path: &str) -> u64 {
        if has_streaming_extension(fuse_path) {
            0
        } else {
            self.size
        }
    }

    pub fn ordered_read_pending(&self) -> bool {
        self.ordered_read_pending.load(Ordering::Relaxed)
    }

    pub fn clear_ordered_read_pending(&self) {
        self.ordered_read_pending.store(false, Ordering::Relaxed);
    }
}

/// Mapping from mount-relative path to [`FileMetadata`], remembering
/// listing order. Owner ids and the timestamp reported for every entry
/// are captured once at construction.
pub struct AttrCache {
    files: HashMap<String, FileMetadata>,
    listing_order: Vec<String>,
    uid: u32,
    gid: u32,
    built_at: SystemTime,
}

impl AttrCache {
    pub fn new() -> Self {
        AttrCache {
            files: HashMap::new(),
            listing_order: Vec::new(),
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            built_at: SystemTime::now(),
        }
    }

    pub fn insert(&mut self, fuse_path: &str, size: u64, ordered_read_pending: bool) {
        let path = if fuse_path.starts_with('/') {
            fuse_path.to_string()
        } else {
            format!("/{fuse_path}")
        };
        if self
            .files
            .insert(path.clone(), FileMetadata::new(size, ordered_read_pending))
            .is_none()
        {
            self.listing_order.push(path);
        }
    }

    pub fn get(&self, fuse_path: &str) -> Option<&FileMetadata> {
        self.files.get(fuse_path)
    }

    pub fn contains(&self, fuse_path: &str) -> bool {
        self.files.contains_key(fuse_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths in the order the listing produced them; the order the
    /// pre-opener walks.
    pub fn paths_in_listing_order(&self) -> impl Iterator<Item = &str> {
        self.listing_order.iter().map(String::as_str)
    }

    pub fn clear_ordered_read_pending(&self, fuse_path: &str) {
        if let Some(metadata) = self.files.get(fuse_path) {
            metadata.clear_ordered_read_pending();
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Timestamp reported as atime/mtime/ctime for every cached entry.
    pub fn built_at(&self) -> SystemTime {
        self.built_at
    }
}

impl Default for AttrCache {
    fn default() -> Self {
        Self::new()
    }
}
