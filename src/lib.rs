//! S3-backed FUSE mounts optimized for sequential streaming of CLP log
//! archives.
//!
//! The crate projects an S3-compatible bucket prefix as a POSIX
//! directory tree, specialized for three access patterns:
//!
//! - **Sequential read** ([`mount_sequential_read`]): a listing-backed
//!   read-only tree with per-object streaming and an optional pre-open
//!   pipeline that amortizes connection latency when files are opened in
//!   listing order.
//! - **CLP archive read** ([`mount_clp_sequential_read`]): understands
//!   the archive directory layout, aggressively prefetches the small
//!   metadata files packed into each archive's merged object, and
//!   streams segment files on demand.
//! - **Mostly-sequential write** ([`mount_mostly_sequential_write`]):
//!   accepts files created by the compressor; metadata files are staged
//!   in a local cache and concatenated into one merged object at close,
//!   segment files stream directly to the store.
//!
//! A fourth, plain stream-per-file write mount
//! ([`mount_ir_sequential_write`]) serves the IR extraction pipeline.
//!
//! Each mount call blocks until unmount. Coordination is OS threads plus
//! bounded queues; there is no async runtime.

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod fs;
pub mod mount;
pub mod s3path;
pub mod store;
pub mod workers;

pub use error::{Error, Result};
pub use mount::{
    mount_clp_sequential_read, mount_ir_sequential_write, mount_mostly_sequential_write,
    mount_sequential_read, mount_sequential_read_with_options, ReadMountOptions,
};
pub use s3path::S3MountConfig;
