//! Read-only mount backed by a full listing, optimized for opening many
//! objects in a known or likely order.
//!
//! In ordered mode, `open` consumes the pre-opener's hand-off queue from
//! the head, closing and recycling streams until the requested path
//! matches. In unordered mode it first consults a parking map of
//! already-drained streams, optionally drains whatever the queue holds,
//! and finally opens a fresh stream on the spot.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use fuser::{
    Errno, FileHandle, FileType, Filesystem, FopenFlags, Generation, INodeNo, LockOwner,
    OpenFlags, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, Request, TimeOrNow, WriteFlags,
};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::cache::{has_streaming_extension, AttrCache, ReaddirCache};
use crate::error::Result;
use crate::fs::inode::InodeTable;
use crate::fs::{dir_attr, errno_for, file_attr, parent_path, FILE_PERM, TTL};
use crate::mount::ReadMountOptions;
use crate::s3path::S3MountConfig;
use crate::store::ManagedReadStream;

struct FsState {
    inodes: InodeTable,
    /// Path → stream registered by `open`; at most one per path.
    opened: HashMap<String, ManagedReadStream>,
    /// Unordered mode only: pre-opened streams drained off the queue
    /// while looking for some other path.
    parked: HashMap<String, ManagedReadStream>,
}

pub struct SequentialReadFs {
    config: S3MountConfig,
    attr_cache: Arc<AttrCache>,
    readdir_cache: ReaddirCache,
    preopened_rx: Receiver<ManagedReadStream>,
    recycled_tx: Sender<Option<ManagedReadStream>>,
    recycled_rx: Receiver<Option<ManagedReadStream>>,
    ordered_reads: bool,
    drain_queued_on_miss: bool,
    prefetch_limit: u64,
    state: Mutex<FsState>,
}

impl SequentialReadFs {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: S3MountConfig,
        attr_cache: Arc<AttrCache>,
        readdir_cache: ReaddirCache,
        preopened_rx: Receiver<ManagedReadStream>,
        recycled_tx: Sender<Option<ManagedReadStream>>,
        recycled_rx: Receiver<Option<ManagedReadStream>>,
        options: &ReadMountOptions,
    ) -> Self {
        debug!("initialized read-only mount for sequential object access");
        SequentialReadFs {
            config,
            attr_cache,
            readdir_cache,
            preopened_rx,
            recycled_tx,
            recycled_rx,
            ordered_reads: options.ordered_reads,
            drain_queued_on_miss: options.drain_queued_on_miss,
            prefetch_limit: options.small_file_prefetch_limit,
            state: Mutex::new(FsState {
                inodes: InodeTable::new(),
                opened: HashMap::new(),
                parked: HashMap::new(),
            }),
        }
    }

    /// Takes a recycled stream when one is idle, otherwise builds a new
    /// one, and opens it on `fuse_path`.
    fn create_object_stream(&self, fuse_path: &str) -> Result<ManagedReadStream> {
        let mut stream = match self.recycled_rx.try_recv() {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                // Shutdown sentinel; put it back for the pre-opener.
                let _ = self.recycled_tx.send(None);
                ManagedReadStream::with_prefetch_limit(&self.config, self.prefetch_limit)?
            }
            Err(_) => ManagedReadStream::with_prefetch_limit(&self.config, self.prefetch_limit)?,
        };
        let size_hint = self.attr_cache.get(fuse_path).map(|meta| meta.size());
        stream.open(fuse_path, size_hint)?;
        Ok(stream)
    }

    fn attr_for_path(&self, fuse_path: &str, ino: u64) -> Option<fuser::FileAttr> {
        let uid = self.attr_cache.uid();
        let gid = self.attr_cache.gid();
        let timestamp = self.attr_cache.built_at();
        if let Some(metadata) = self.attr_cache.get(fuse_path) {
            return Some(file_attr(
                ino,
                metadata.reported_size(fuse_path),
                FILE_PERM,
                uid,
                gid,
                timestamp,
            ));
        }
        if self.readdir_cache.contains(fuse_path) {
            return Some(dir_attr(ino, uid, gid, timestamp));
        }
        None
    }

    fn do_open(&self, fuse_path: &str) -> std::result::Result<(), Errno> {
        let mut state = self.state.lock();
        if state.opened.contains_key(fuse_path) {
            // Opening the same file multiple times concurrently is not
            // supported.
            return Err(Errno::EBUSY);
        }

        if self.ordered_reads {
            loop {
                match self.preopened_rx.recv() {
                    Ok(mut stream) => {
                        if stream.fuse_path() == Some(fuse_path) {
                            state.opened.insert(fuse_path.to_string(), stream);
                            return Ok(());
                        }
                        debug!(
                            skipped = stream.fuse_path().unwrap_or_default(),
                            "recycling non-matching pre-opened stream"
                        );
                        stream.close();
                        let _ = self.recycled_tx.send(Some(stream));
                    }
                    Err(_) => {
                        // Pre-opener has shut down; open on the spot.
                        let stream = self.create_object_stream(fuse_path).map_err(|err| {
                            error!(path = fuse_path, %err, "failed to open object stream");
                            errno_for(&err)
                        })?;
                        state.opened.insert(fuse_path.to_string(), stream);
                        return Ok(());
                    }
                }
            }
        }

        // Unordered mode: check the parking map first.
        if let Some(stream) = state.parked.remove(fuse_path) {
            state.opened.insert(fuse_path.to_string(), stream);
            return Ok(());
        }

        if self.drain_queued_on_miss {
            // Drain whatever is queued right now; every stream drained
            // here has had its ordered-read expectation voided.
            while let Ok(stream) = self.preopened_rx.try_recv() {
                let stream_path = stream.fuse_path().map(str::to_string);
                if let Some(path) = &stream_path {
                    self.attr_cache.clear_ordered_read_pending(path);
                }
                if stream_path.as_deref() == Some(fuse_path) {
                    state.opened.insert(fuse_path.to_string(), stream);
                    return Ok(());
                }
                if let Some(path) = stream_path {
                    state.parked.insert(path, stream);
                }
            }
        }

        self.attr_cache.clear_ordered_read_pending(fuse_path);
        let stream = self.create_object_stream(fuse_path).map_err(|err| {
            error!(path = fuse_path, %err, "failed to open object stream");
            errno_for(&err)
        })?;
        debug!(uri = %self.config.uri_for_path(fuse_path), "opened object stream");
        state.opened.insert(fuse_path.to_string(), stream);
        Ok(())
    }

    fn path_for(&self, ino: INodeNo) -> Option<String> {
        self.state.lock().inodes.path(ino.0).map(str::to_string)
    }
}

impl Filesystem for SequentialReadFs {
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
            Some(attr) => reply.entry(&TTL, &attr, Generation(0)),
            None => reply.error(Errno::ENOENT),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        let Some(fuse_path) = self.path_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        debug!(path = %fuse_path, "getattr");
        match self.attr_for_path(&fuse_path, ino.0) {
            Some(attr) => reply.attr(&TTL, &attr),
            None => reply.error(Errno::ENOENT),
        }
    }

    fn opendir(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        let Some(fuse_path) = self.path_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        if self.readdir_cache.contains(&fuse_path) {
            reply.opened(FileHandle(0), FopenFlags::empty());
        } else {
            reply.error(Errno::ENOENT);
        }
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        let Some(fuse_path) = self.path_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        debug!(path = %fuse_path, offset, "readdir");
        let Some(node) = self.readdir_cache.node(&fuse_path) else {
            error!(path = %fuse_path, "readdir on unknown directory");
            reply.error(Errno::ENOENT);
            return;
        };

        let mut state = self.state.lock();
        let parent_ino = state.inodes.ino(parent_path(&fuse_path));
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino.0, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for name in node.directory_names() {
            let child = InodeTable::child_path(&fuse_path, name);
            entries.push((state.inodes.ino(&child), FileType::Directory, name.to_string()));
        }
        for name in node.files() {
            let child = InodeTable::child_path(&fuse_path, name);
            entries.push((
                state.inodes.ino(&child),
                FileType::RegularFile,
                name.to_string(),
            ));
        }
        drop(state);

        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(INodeNo(*entry_ino), (i + 1) as u64, *kind, name) {
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
        match self.do_open(&fuse_path) {
            Ok(()) => {
                // Size-overridden files must bypass the page cache so the
                // kernel does not clamp reads at the reported zero size.
                let flags = if has_streaming_extension(&fuse_path) {
                    FopenFlags::FOPEN_DIRECT_IO
                } else {
                    FopenFlags::empty()
                };
                reply.opened(FileHandle(0), flags);
            }
            Err(errno) => reply.error(errno),
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
        let mut state = self.state.lock();
        if !state.opened.contains_key(&fuse_path) {
            // Out-of-band read without a registered stream; open lazily.
            match self.create_object_stream(&fuse_path) {
                Ok(stream) => {
                    debug!(uri = %self.config.uri_for_path(&fuse_path), "opened object stream");
                    state.opened.insert(fuse_path.clone(), stream);
                }
                Err(err) => {
                    error!(path = %fuse_path, %err, "failed to open object stream");
                    reply.error(errno_for(&err));
                    return;
                }
            }
        }
        let stream = state
            .opened
            .get_mut(&fuse_path)
            .expect("stream registered above");
        match stream.read_at(size as usize, offset) {
            Ok(data) => reply.data(&data),
            Err(err) => {
                error!(path = %fuse_path, %err, "read failed");
                reply.error(errno_for(&err));
            }
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
        let stream = self.state.lock().opened.remove(&fuse_path);
        if let Some(mut stream) = stream {
            stream.close();
            let _ = self.recycled_tx.send(Some(stream));
            debug!(path = %fuse_path, "recycled object stream");
        }
        reply.ok();
    }
}
