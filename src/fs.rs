//! FUSE operation handlers.
//!
//! One filesystem type per access pattern:
//! - [`sequential_read`] — listing-backed read mount with a pre-opener
//! - [`clp_read`]        — archive-aware read mount with merged-metadata
//!                         prefetch
//! - [`archive_write`]   — compression output mount staging metadata
//!                         containers locally
//! - [`stream_write`]    — plain stream-per-file write mount
//!
//! All four keep path-keyed state behind one mutex and translate inode
//! addressing through a per-mount [`inode::InodeTable`]. Unsupported
//! operations answer with the variant's canonical refusal (`EROFS` on
//! read-only surfaces, `EACCES` for reopen-for-write).

pub mod archive_write;
pub mod clp_read;
pub mod inode;
pub mod sequential_read;
pub mod stream_write;

pub use archive_write::ArchiveWriteFs;
pub use clp_read::ClpSequentialReadFs;
pub use sequential_read::SequentialReadFs;
pub use stream_write::StreamWriteFs;

use std::time::{Duration, SystemTime};

use fuser::{Errno, FileAttr, FileType, INodeNo};
use reqwest::StatusCode;

use crate::error::Error;

/// Kernel cache lifetime for entries and attributes. Everything reported
/// here is synthesized and stable for the life of the mount.
pub(crate) const TTL: Duration = Duration::from_secs(1);

/// Permission bits reported for regular files (`-r--r--r--`).
pub(crate) const FILE_PERM: u16 = 0o444;
/// Permission bits for files consumers may also write (`-rw-rw-rw-`).
pub(crate) const WRITABLE_FILE_PERM: u16 = 0o666;
/// Permission bits reported for directories (`dr--r--r--`).
pub(crate) const DIR_PERM: u16 = 0o444;

/// Reported block size for `stat`; block counts use 512-byte units.
const BLKSIZE: u32 = 4096;

pub(crate) fn file_attr(
    ino: u64,
    size: u64,
    perm: u16,
    uid: u32,
    gid: u32,
    timestamp: SystemTime,
) -> FileAttr {
    FileAttr {
        ino: INodeNo(ino),
        size,
        blocks: size.div_ceil(512),
        atime: timestamp,
        mtime: timestamp,
        ctime: timestamp,
        crtime: timestamp,
        kind: FileType::RegularFile,
        perm,
        nlink: 1,
        uid,
        gid,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}

pub(crate) fn dir_attr(ino: u64, uid: u32, gid: u32, timestamp: SystemTime) -> FileAttr {
    FileAttr {
        ino: INodeNo(ino),
        size: 512,
        blocks: 1,
        atime: timestamp,
        mtime: timestamp,
        ctime: timestamp,
        crtime: timestamp,
        kind: FileType::Directory,
        perm: DIR_PERM,
        nlink: 1,
        uid,
        gid,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}

/// Maps a library error onto the errno surfaced to the kernel. Anything
/// without a more precise mapping becomes `EIO`.
pub(crate) fn errno_for(error: &Error) -> Errno {
    match error {
        Error::ObjectNotFound(_) => Errno::ENOENT,
        Error::Http(err) if err.status() == Some(StatusCode::NOT_FOUND) => Errno::ENOENT,
        _ => Errno::EIO,
    }
}

/// Final component of a mount-relative path.
pub(crate) fn basename(fuse_path: &str) -> &str {
    fuse_path.rsplit('/').next().unwrap_or(fuse_path)
}

/// First component of a mount-relative path, when the path has at least
/// two components (`/<archive>/...`).
pub(crate) fn archive_name_of(fuse_path: &str) -> Option<&str> {
    let rest = fuse_path.strip_prefix('/')?;
    let (archive_name, remainder) = rest.split_once('/')?;
    if archive_name.is_empty() || remainder.is_empty() {
        None
    } else {
        Some(archive_name)
    }
}

/// Parent of a mount-relative path; the root is its own parent.
pub(crate) fn parent_path(fuse_path: &str) -> &str {
    match fuse_path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &fuse_path[..idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_takes_final_component() {
        assert_eq!(basename("/a/b/c.bin"), "c.bin");
        assert_eq!(basename("/top"), "top");
    }

    #[test]
    fn archive_name_requires_two_components() {
        assert_eq!(archive_name_of("/arch/metadata.db"), Some("arch"));
        assert_eq!(archive_name_of("/arch/s/0"), Some("arch"));
        assert_eq!(archive_name_of("/lone"), None);
        assert_eq!(archive_name_of("/"), None);
    }

    #[test]
    fn parent_path_walks_up_one_level() {
        assert_eq!(parent_path("/a/b/c"), "/a/b");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(parent_path("/"), "/");
    }
}
