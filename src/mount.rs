//! Mount lifecycle: directory preparation (including stale-mount
//! recovery), worker thread start/stop, the FUSE session itself, and
//! teardown.
//!
//! Each entry point blocks until the filesystem is unmounted, then
//! signals its worker threads via the shutdown event plus a queue
//! sentinel, joins them, and removes the mount and cache directories.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded};
use fuser::{Config, MountOption, SessionACL};
use tracing::{debug, warn};

use crate::cache::{generate_caches, MetadataCache};
use crate::config::{
    CACHE_REQUEST_QUEUE_CAPACITY, DEFAULT_PREOPENED_STREAM_COUNT, PREOPENED_QUEUE_CAPACITY,
    SEQUENTIAL_READ_BUFFER_SIZE,
};
use crate::error::{Error, Result};
use crate::fs::{ArchiveWriteFs, ClpSequentialReadFs, SequentialReadFs, StreamWriteFs};
use crate::s3path::S3MountConfig;
use crate::store::{Connection, ManagedReadStream};
use crate::workers::{metadata_downloader_thread, preopener_thread};

/// Tunables for the sequential-read mount.
#[derive(Debug, Clone)]
pub struct ReadMountOptions {
    /// Expect files to be opened in listing order and serve them from
    /// the pre-opener's hand-off queue.
    pub ordered_reads: bool,
    /// In unordered mode, drain every currently queued pre-opened stream
    /// into the parking map when the requested path is not queued first.
    pub drain_queued_on_miss: bool,
    /// Streams seeded into the recycled pool for the pre-opener.
    pub preopened_stream_count: usize,
    /// Objects at or below this size are buffered whole at open.
    pub small_file_prefetch_limit: u64,
}

impl Default for ReadMountOptions {
    fn default() -> Self {
        ReadMountOptions {
            ordered_reads: true,
            drain_queued_on_miss: true,
            preopened_stream_count: DEFAULT_PREOPENED_STREAM_COUNT,
            small_file_prefetch_limit: SEQUENTIAL_READ_BUFFER_SIZE as u64,
        }
    }
}

// ── Entry points ─────────────────────────────────────────────────────────────

/// Mounts the listing-backed sequential-read filesystem with default
/// options. Blocks until unmounted.
pub fn mount_sequential_read(
    config: &S3MountConfig,
    mount_dir: &Path,
    cache_dir: &Path,
) -> Result<()> {
    mount_sequential_read_with_options(config, mount_dir, cache_dir, ReadMountOptions::default())
}

/// Mounts the listing-backed sequential-read filesystem. Blocks until
/// unmounted.
pub fn mount_sequential_read_with_options(
    config: &S3MountConfig,
    mount_dir: &Path,
    cache_dir: &Path,
    options: ReadMountOptions,
) -> Result<()> {
    prepare_mount_dir(mount_dir)?;
    prepare_cache_dir(cache_dir)?;

    let connection = Connection::new(config)?;
    let (attr_cache, readdir_cache) = generate_caches(config, &connection, options.ordered_reads)?;
    let attr_cache = Arc::new(attr_cache);

    let (preopened_tx, preopened_rx) = bounded(PREOPENED_QUEUE_CAPACITY);
    let (recycled_tx, recycled_rx) = unbounded();
    for _ in 0..options.preopened_stream_count {
        let stream =
            ManagedReadStream::with_prefetch_limit(config, options.small_file_prefetch_limit)?;
        let _ = recycled_tx.send(Some(stream));
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let preopener = {
        let attr_cache = Arc::clone(&attr_cache);
        let recycled_rx = recycled_rx.clone();
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("preopener".to_string())
            .spawn(move || preopener_thread(attr_cache, recycled_rx, preopened_tx, shutdown))
            .map_err(Error::Io)?
    };

    let filesystem = SequentialReadFs::new(
        config.clone(),
        attr_cache,
        readdir_cache,
        preopened_rx,
        recycled_tx.clone(),
        recycled_rx,
        &options,
    );
    let mount_result = fuser::mount2(filesystem, mount_dir, &fuse_options(true));

    shutdown.store(true, Ordering::Relaxed);
    let _ = recycled_tx.send(None);
    if preopener.join().is_err() {
        warn!("pre-opener thread panicked");
    }

    remove_dir_logged(mount_dir);
    remove_dir_logged(cache_dir);
    mount_result.map_err(Error::Io)
}

/// Mounts the CLP-archive read filesystem. `max_file_size` is the
/// synthetic size reported for files whose real size is unknown. Blocks
/// until unmounted.
pub fn mount_clp_sequential_read(
    config: &S3MountConfig,
    mount_dir: &Path,
    cache_dir: &Path,
    max_file_size: u64,
) -> Result<()> {
    prepare_mount_dir(mount_dir)?;
    prepare_cache_dir(cache_dir)?;

    let metadata_cache = Arc::new(MetadataCache::new(cache_dir));
    let (request_tx, request_rx) = bounded(CACHE_REQUEST_QUEUE_CAPACITY);
    let shutdown = Arc::new(AtomicBool::new(false));

    let downloader = {
        let config = config.clone();
        let metadata_cache = Arc::clone(&metadata_cache);
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("metadata-downloader".to_string())
            .spawn(move || {
                metadata_downloader_thread(&config, metadata_cache, request_rx, shutdown)
            })
            .map_err(Error::Io)?
    };

    let connection = Arc::new(Connection::new(config)?);
    let filesystem = ClpSequentialReadFs::new(
        config.clone(),
        connection,
        metadata_cache,
        request_tx.clone(),
        max_file_size,
    );
    let mount_result = fuser::mount2(filesystem, mount_dir, &fuse_options(true));

    shutdown.store(true, Ordering::Relaxed);
    let _ = request_tx.send(None);
    if downloader.join().is_err() {
        warn!("metadata downloader thread panicked");
    }

    remove_dir_logged(mount_dir);
    remove_dir_logged(cache_dir);
    mount_result.map_err(Error::Io)
}

/// Mounts the archive write filesystem, staging metadata containers
/// under `cache_dir`. Blocks until unmounted.
pub fn mount_mostly_sequential_write(
    config: &S3MountConfig,
    mount_dir: &Path,
    cache_dir: &Path,
) -> Result<()> {
    prepare_mount_dir(mount_dir)?;
    prepare_cache_dir(cache_dir)?;

    let connection = Arc::new(Connection::new(config)?);
    let filesystem =
        ArchiveWriteFs::new(config.clone(), connection, cache_dir.to_path_buf());
    let mount_result = fuser::mount2(filesystem, mount_dir, &fuse_options(false));

    remove_dir_logged(mount_dir);
    remove_dir_logged(cache_dir);
    mount_result.map_err(Error::Io)
}

/// Mounts the stream-per-file write filesystem. Blocks until unmounted.
pub fn mount_ir_sequential_write(config: &S3MountConfig, mount_dir: &Path) -> Result<()> {
    prepare_mount_dir(mount_dir)?;

    let connection = Arc::new(Connection::new(config)?);
    let filesystem = StreamWriteFs::new(config.clone(), connection);
    let mount_result = fuser::mount2(filesystem, mount_dir, &fuse_options(false));

    remove_dir_logged(mount_dir);
    mount_result.map_err(Error::Io)
}

// ── Directory preparation and teardown ───────────────────────────────────────

fn fuse_options(read_only: bool) -> Config {
    let mut options = vec![MountOption::FSName("clp-remote-fuse".to_string())];
    if read_only {
        options.push(MountOption::RO);
    }
    let mut config = Config::default();
    config.mount_options = options;
    config.acl = SessionACL::All;
    config
}

/// Ensures the mount directory exists and is empty. A stale FUSE mount
/// left by a crashed process surfaces as `ENOTCONN`; recover by
/// unmounting and retrying once.
fn prepare_mount_dir(mount_dir: &Path) -> Result<()> {
    match ensure_empty_dir(mount_dir) {
        Err(Error::Io(err)) if err.raw_os_error() == Some(libc::ENOTCONN) => {
            warn!(dir = %mount_dir.display(), "stale mount detected; unmounting");
            unmount(mount_dir);
            ensure_empty_dir(mount_dir)
        }
        other => other,
    }
}

fn ensure_empty_dir(dir: &Path) -> Result<()> {
    match fs::read_dir(dir) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                Err(Error::MountDirNotEmpty(dir.to_path_buf()))
            } else {
                Ok(())
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Recreates the cache directory from scratch.
fn prepare_cache_dir(cache_dir: &Path) -> Result<()> {
    if cache_dir.exists() {
        fs::remove_dir_all(cache_dir)?;
    }
    fs::create_dir_all(cache_dir)?;
    Ok(())
}

/// Unmounts a FUSE mountpoint, preferring the setuid fusermount helpers
/// so unprivileged mounts can be cleaned up too.
fn unmount(mount_dir: &Path) {
    for helper in ["fusermount3", "fusermount"] {
        match Command::new(helper).arg("-u").arg(mount_dir).status() {
            Ok(status) if status.success() => {
                debug!(helper, dir = %mount_dir.display(), "unmounted");
                return;
            }
            _ => continue,
        }
    }
    if let Err(err) = nix::mount::umount(mount_dir) {
        warn!(dir = %mount_dir.display(), %err, "unmount failed");
    }
}

fn remove_dir_logged(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), %err, "failed to remove directory");
        }
    }
}
