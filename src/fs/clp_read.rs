//! Read-only mount specialized for CLP archive layouts.
//!
//! Operates without a listing: directory shape is inferred (the root,
//! UUIDv4 archive directories, the reserved `s` and `l` subdirectories),
//! everything else is a file. Metadata files are served from the disk
//! cache populated by the background downloader; segment files are
//! streamed on demand. Fetch of an archive's merged metadata is enqueued
//! eagerly the first time the archive directory is stat'ed.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime};

use crossbeam_channel::Sender;
use fuser::{
    Errno, FileAttr, FileHandle, FileType, Filesystem, FopenFlags, Generation, INodeNo,
    LockOwner, OpenFlags, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, Request, TimeOrNow, WriteFlags,
};
use nix::unistd::{getgid, getuid};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::archive::{
    is_archive_name, is_generated_filename, is_metadata_filename, metadata_cache_key,
    MERGED_METADATA_OBJECT_NAME, METADATA_FILENAMES,
};
use crate::cache::MetadataCache;
use crate::config::{METADATA_POLL_INTERVAL, METADATA_WAIT_TIMEOUT, METADATA_WAIT_WARN_INTERVAL};
use crate::fs::inode::InodeTable;
use crate::fs::{
    basename, dir_attr, errno_for, file_attr, parent_path, FILE_PERM, TTL, WRITABLE_FILE_PERM,
};
use crate::s3path::S3MountConfig;
use crate::store::{Connection, ObjectReader};
use crate::workers::MetadataFetchRequest;

/// Reserved directory name for segment files.
fn is_segment_directory_name(name: &str) -> bool {
    name == "s"
}

/// Reserved directory name for on-disk log files.
fn is_logs_directory_name(name: &str) -> bool {
    name == "l"
}

struct ClpState {
    inodes: InodeTable,
    object_streams: HashMap<String, ObjectReader>,
}

pub struct ClpSequentialReadFs {
    config: S3MountConfig,
    connection: Arc<Connection>,
    metadata_cache: Arc<MetadataCache>,
    download_tx: Sender<Option<MetadataFetchRequest>>,
    /// Synthetic size reported for files whose real size is unknown.
    max_file_size: u64,
    uid: u32,
    gid: u32,
    state: Mutex<ClpState>,
}

impl ClpSequentialReadFs {
    pub fn new(
        config: S3MountConfig,
        connection: Arc<Connection>,
        metadata_cache: Arc<MetadataCache>,
        download_tx: Sender<Option<MetadataFetchRequest>>,
        max_file_size: u64,
    ) -> Self {
        debug!("initialized CLP archive read mount");
        ClpSequentialReadFs {
            config,
            connection,
            metadata_cache,
            download_tx,
            max_file_size,
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            state: Mutex::new(ClpState {
                inodes: InodeTable::new(),
                object_streams: HashMap::new(),
            }),
        }
    }

    /// Stat of an archive directory is the earliest signal that its
    /// metadata will be read; enqueue a background fetch unless every
    /// metadata file is already cached.
    fn request_metadata_prefetch(&self, archive_name: &str) {
        let missing = METADATA_FILENAMES.iter().any(|&filename| {
            !self
                .metadata_cache
                .contains(&metadata_cache_key(archive_name, filename))
        });
        if !missing {
            return;
        }
        let object_key = self
            .config
            .prefixed_key(&format!("/{archive_name}/{MERGED_METADATA_OBJECT_NAME}"));
        let request = MetadataFetchRequest {
            archive_name: archive_name.to_string(),
            object_key,
        };
        if self.download_tx.try_send(Some(request)).is_err() {
            warn!(archive = archive_name, "metadata fetch queue unavailable; dropping request");
        }
    }

    /// Polls `probe` until it yields, warning once a second and failing
    /// with `EIO` at the deadline.
    fn wait_for<T>(
        &self,
        what: &str,
        probe: impl Fn() -> Option<T>,
    ) -> std::result::Result<T, Errno> {
        let start = Instant::now();
        let mut next_warn = METADATA_WAIT_WARN_INTERVAL;
        loop {
            if let Some(value) = probe() {
                return Ok(value);
            }
            if start.elapsed() >= METADATA_WAIT_TIMEOUT {
                error!(what, "metadata wait deadline exceeded");
                return Err(Errno::EIO);
            }
            thread::sleep(METADATA_POLL_INTERVAL);
            if start.elapsed() >= next_warn {
                warn!(
                    what,
                    waited_secs = start.elapsed().as_secs(),
                    "metadata not yet downloaded; still waiting"
                );
                next_warn += METADATA_WAIT_WARN_INTERVAL;
            }
        }
    }

    fn attr_for_path(&self, fuse_path: &str, ino: u64) -> std::result::Result<FileAttr, Errno> {
        let epoch = SystemTime::UNIX_EPOCH;
        if fuse_path == "/" {
            return Ok(dir_attr(ino, self.uid, self.gid, epoch));
        }
        let name = basename(fuse_path);
        if is_archive_name(name) {
            self.request_metadata_prefetch(name);
            return Ok(dir_attr(ino, self.uid, self.gid, epoch));
        }
        if is_segment_directory_name(name) || is_logs_directory_name(name) {
            return Ok(dir_attr(ino, self.uid, self.gid, epoch));
        }
        if is_generated_filename(name) {
            return Err(Errno::ENOENT);
        }
        if name == "metadata.db" {
            // Consumers check this size before opening the database, so
            // block until the true size is known.
            let size = self.wait_for(fuse_path, || self.metadata_cache.size_of(fuse_path))?;
            debug!(path = fuse_path, size, "reporting true metadata.db size");
            return Ok(file_attr(
                ino,
                size,
                WRITABLE_FILE_PERM,
                self.uid,
                self.gid,
                epoch,
            ));
        }
        Ok(file_attr(
            ino,
            self.max_file_size,
            FILE_PERM,
            self.uid,
            self.gid,
            epoch,
        ))
    }

    fn path_for(&self, ino: INodeNo) -> Option<String> {
        self.state.lock().inodes.path(ino.0).map(str::to_string)
    }
}

impl Filesystem for ClpSequentialReadFs {
    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(Errno::ENOENT);
            return;
        };
        let mut state = self.state.lock();
        let Some(parent_path) = state.inodes.path(parent.0).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let fuse_path = InodeTable::child_path(&parent_path, name);
        let ino = state.inodes.ino(&fuse_path);
        drop(state);

        match self.attr_for_path(&fuse_path, ino) {
            Ok(attr) => reply.entry(&TTL, &attr, Generation(0)),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        let Some(fuse_path) = self.path_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        debug!(path = %fuse_path, "getattr");
        match self.attr_for_path(&fuse_path, ino.0) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn opendir(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        // Directory shape is heuristic; every known inode may be listed.
        reply.opened(FileHandle(0), FopenFlags::empty());
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        // No listing exists; consumers navigate by known names.
        let Some(fuse_path) = self.path_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let parent_ino = self.state.lock().inodes.ino(parent_path(&fuse_path));
        let entries = [(ino.0, "."), (parent_ino, "..")];
        for (i, (entry_ino, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(INodeNo(*entry_ino), (i + 1) as u64, FileType::Directory, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        let Some(fuse_path) = self.path_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        debug!(path = %fuse_path, "open");
        let name = basename(&fuse_path);

        if is_generated_filename(name) {
            reply.error(Errno::ENOENT);
            return;
        }
        if is_metadata_filename(name) {
            // No-op: the background downloader satisfies later reads.
            reply.opened(FileHandle(0), FopenFlags::FOPEN_KEEP_CACHE);
            return;
        }

        let mut state = self.state.lock();
        if state.object_streams.contains_key(&fuse_path) {
            error!(path = %fuse_path, "already open; concurrent opens are unsupported");
            reply.error(Errno::EBUSY);
            return;
        }
        let key = self.config.prefixed_key(&fuse_path);
        debug!(uri = %format!("{}{}", self.config.s3_uri_prefix(), fuse_path), "streaming object");
        match ObjectReader::open(Arc::clone(&self.connection), key) {
            Ok(stream) => {
                state.object_streams.insert(fuse_path, stream);
                reply.opened(FileHandle(0), FopenFlags::FOPEN_KEEP_CACHE);
            }
            Err(err) => {
                error!(path = %fuse_path, %err, "object not found in store");
                reply.error(errno_for(&err));
            }
        }
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        let Some(fuse_path) = self.path_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        debug!(path = %fuse_path, size, offset, "read");
        let name = basename(&fuse_path);

        if is_generated_filename(name) {
            reply.error(Errno::EROFS);
            return;
        }
        if is_metadata_filename(name) {
            if let Err(errno) = self.wait_for(&fuse_path, || {
                self.metadata_cache.contains(&fuse_path).then_some(())
            }) {
                reply.error(errno);
                return;
            }
            match self.metadata_cache.read_at(&fuse_path, offset, size as usize) {
                Ok(Some(data)) => reply.data(&data),
                Ok(None) => reply.error(Errno::EIO),
                Err(err) => {
                    error!(path = %fuse_path, %err, "metadata cache read failed");
                    reply.error(Errno::EIO);
                }
            }
            return;
        }

        let mut state = self.state.lock();
        match state.object_streams.get_mut(&fuse_path) {
            Some(stream) => match stream.read_at(size as usize, offset) {
                Ok(data) => reply.data(&data),
                Err(err) => {
                    error!(path = %fuse_path, %err, "read failed");
                    reply.error(errno_for(&err));
                }
            },
            None => reply.error(Errno::EIO),
        }
    }

    fn write(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _fh: FileHandle,
        _offset: u64,
        _data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: fuser::ReplyWrite,
    ) {
        reply.error(Errno::EROFS);
    }

    fn setattr(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<fuser::BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        reply.error(Errno::EROFS);
    }

    fn mkdir(
        &self,
        _req: &Request,
        _parent: INodeNo,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(Errno::EROFS);
    }

    fn create(
        &self,
        _req: &Request,
        _parent: INodeNo,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        reply.error(Errno::EROFS);
    }

    fn unlink(&self, _req: &Request, _parent: INodeNo, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(Errno::EROFS);
    }

    fn flush(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _fh: FileHandle,
        _lock_owner: LockOwner,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn release(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let Some(fuse_path) = self.path_for(ino) else {
            reply.ok();
            return;
        };
        debug!(path = %fuse_path, "release");
        if !is_metadata_filename(basename(&fuse_path)) {
            self.state.lock().object_streams.remove(&fuse_path);
        }
        reply.ok();
    }
}
