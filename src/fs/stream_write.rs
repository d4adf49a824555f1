//! Plain streaming write mount: every created file becomes one upload
//! stream, finalized at release. Used by the IR extraction pipeline,
//! which writes each output file exactly once, front to back.

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::SystemTime;

use fuser::{
    Errno, FileAttr, FileHandle, FileType, Filesystem, FopenFlags, Generation, INodeNo,
    LockOwner, OpenFlags, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow, WriteFlags,
};
use nix::unistd::{getgid, getuid};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::fs::inode::InodeTable;
use crate::fs::{dir_attr, errno_for, file_attr, FILE_PERM, TTL};
use crate::s3path::S3MountConfig;
use crate::store::{Connection, UploadStream};

struct StreamWriteState {
    inodes: InodeTable,
    object_streams: HashMap<String, UploadStream>,
    created_directory_paths: HashSet<String>,
    created_file_paths: HashSet<String>,
}

pub struct StreamWriteFs {
    config: S3MountConfig,
    connection: Arc<Connection>,
    uid: u32,
    gid: u32,
    state: Mutex<StreamWriteState>,
}

impl StreamWriteFs {
    pub fn new(config: S3MountConfig, connection: Arc<Connection>) -> Self {
        debug!("initialized stream-per-file write mount");
        StreamWriteFs {
            config,
            connection,
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            state: Mutex::new(StreamWriteState {
                inodes: InodeTable::new(),
                object_streams: HashMap::new(),
                created_directory_paths: HashSet::new(),
                created_file_paths: HashSet::new(),
            }),
        }
    }

    fn attr_for_path(
        &self,
        state: &StreamWriteState,
        fuse_path: &str,
        ino: u64,
    ) -> std::result::Result<FileAttr, Errno> {
        let epoch = SystemTime::UNIX_EPOCH;
        if fuse_path == "/" || state.created_directory_paths.contains(fuse_path) {
            return Ok(dir_attr(ino, self.uid, self.gid, epoch));
        }
        if state.created_file_paths.contains(fuse_path) {
            // Only the file type matters to the writer; sizes are fixed.
            return Ok(file_attr(ino, 512, FILE_PERM, self.uid, self.gid, epoch));
        }
        Err(Errno::ENOENT)
    }

    fn path_for(&self, ino: INodeNo) -> Option<String> {
        self.state.lock().inodes.path(ino.0).map(str::to_string)
    }
}

impl Filesystem for StreamWriteFs {
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
        match self.attr_for_path(&state, &fuse_path, ino) {
            Ok(attr) => reply.entry(&TTL, &attr, Generation(0)),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        let state = self.state.lock();
        let Some(fuse_path) = state.inodes.path(ino.0).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        debug!(path = %fuse_path, "getattr");
        match self.attr_for_path(&state, &fuse_path, ino.0) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(Errno::EIO);
            return;
        };
        let mut state = self.state.lock();
        let Some(parent_path) = state.inodes.path(parent.0).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let fuse_path = InodeTable::child_path(&parent_path, name);
        debug!(path = %fuse_path, "mkdir");
        state.created_directory_paths.insert(fuse_path.clone());
        let ino = state.inodes.ino(&fuse_path);
        let attr = dir_attr(ino, self.uid, self.gid, SystemTime::UNIX_EPOCH);
        reply.entry(&TTL, &attr, Generation(0));
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(Errno::EIO);
            return;
        };
        let mut state = self.state.lock();
        let Some(parent_path) = state.inodes.path(parent.0).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let fuse_path = InodeTable::child_path(&parent_path, name);
        debug!(path = %fuse_path, "create");

        let key = self.config.prefixed_key(&fuse_path);
        match UploadStream::open(&self.connection, key) {
            Ok(stream) => {
                state.object_streams.insert(fuse_path.clone(), stream);
                state.created_file_paths.insert(fuse_path.clone());
                let ino = state.inodes.ino(&fuse_path);
                let attr = file_attr(ino, 0, FILE_PERM, self.uid, self.gid, SystemTime::UNIX_EPOCH);
                reply.created(
                    &TTL,
                    &attr,
                    Generation(0),
                    FileHandle(0),
                    FopenFlags::FOPEN_KEEP_CACHE,
                );
            }
            Err(err) => {
                error!(path = %fuse_path, %err, "failed to open upload stream");
                reply.error(errno_for(&err));
            }
        }
    }

    fn open(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        // Existing files cannot be reopened; only creation is supported.
        reply.error(Errno::EACCES);
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        let Some(fuse_path) = self.path_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        debug!(path = %fuse_path, length = data.len(), offset, "write");
        let mut state = self.state.lock();
        match state.object_streams.get_mut(&fuse_path) {
            Some(stream) => match stream.write_at(data, offset.max(0) as u64) {
                Ok(written) => reply.written(written as u32),
                Err(err) => {
                    error!(path = %fuse_path, %err, "upload write failed");
                    reply.error(errno_for(&err));
                }
            },
            None => {
                debug!(path = %fuse_path, "write to a file that was never created");
                reply.error(Errno::EACCES);
            }
        }
    }

    fn read(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _fh: FileHandle,
        _offset: u64,
        _size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        reply.error(Errno::EACCES);
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
        let parent_ino = self
            .state
            .lock()
            .inodes
            .ino(crate::fs::parent_path(&fuse_path));
        let entries = [(ino.0, "."), (parent_ino, "..")];
        for (i, (entry_ino, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(INodeNo(*entry_ino), (i + 1) as u64, FileType::Directory, name) {
                break;
            }
        }
        reply.ok();
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

    fn fsync(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _fh: FileHandle,
        _datasync: bool,
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
        let stream = self.state.lock().object_streams.remove(&fuse_path);
        match stream {
            Some(stream) => match stream.finish() {
                Ok(()) => {
                    debug!(path = %fuse_path, "streamed file to object store");
                    reply.ok();
                }
                Err(err) => {
                    error!(path = %fuse_path, %err, "upload failed");
                    reply.error(errno_for(&err));
                }
            },
            None => reply.ok(),
        }
    }
}
