//! Mostly-sequential write mount for compression output.
//!
//! Small metadata files are materialized in local scratch via
//! [`MetadataContainer`] and concatenated into a single merged object
//! once every canonical file has been written and released; segment
//! files stream directly to the object store. Directory and file
//! existence is tracked purely in memory from `mkdir`/`create`.

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use fuser::{
    Errno, FileAttr, FileHandle, FileType, Filesystem, FopenFlags, Generation, INodeNo,
    LockOwner, OpenFlags, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow, WriteFlags,
};
use nix::unistd::{getgid, getuid};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::archive::{
    is_generated_filename, is_metadata_filename, MetadataContainer, MERGED_METADATA_OBJECT_NAME,
};
use crate::error::Error;
use crate::fs::inode::InodeTable;
use crate::fs::{archive_name_of, basename, dir_attr, errno_for, file_attr, FILE_PERM, TTL};
use crate::s3path::S3MountConfig;
use crate::store::{Connection, UploadStream};

struct WriteState {
    inodes: InodeTable,
    object_streams: HashMap<String, UploadStream>,
    metadata_containers: HashMap<String, MetadataContainer>,
    created_directory_paths: HashSet<String>,
    created_file_paths: HashSet<String>,
}

pub struct ArchiveWriteFs {
    config: S3MountConfig,
    connection: Arc<Connection>,
    mount_cache_path: PathBuf,
    uid: u32,
    gid: u32,
    state: Mutex<WriteState>,
}

impl ArchiveWriteFs {
    pub fn new(config: S3MountConfig, connection: Arc<Connection>, mount_cache_path: PathBuf) -> Self {
        debug!("initialized write mount for archive compression output");
        ArchiveWriteFs {
            config,
            connection,
            mount_cache_path,
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            state: Mutex::new(WriteState {
                inodes: InodeTable::new(),
                object_streams: HashMap::new(),
                metadata_containers: HashMap::new(),
                created_directory_paths: HashSet::new(),
                created_file_paths: HashSet::new(),
            }),
        }
    }

    /// True for names staged in a metadata container rather than
    /// streamed as standalone objects.
    fn is_container_filename(name: &str) -> bool {
        is_metadata_filename(name) || is_generated_filename(name)
    }

    fn attr_for_path(
        &self,
        state: &WriteState,
        fuse_path: &str,
        ino: u64,
    ) -> std::result::Result<FileAttr, Errno> {
        let epoch = SystemTime::UNIX_EPOCH;
        if fuse_path == "/" || state.created_directory_paths.contains(fuse_path) {
            return Ok(dir_attr(ino, self.uid, self.gid, epoch));
        }
        if state.created_file_paths.contains(fuse_path) {
            let name = basename(fuse_path);
            let mut size = 0;
            // The compressor re-stats its database and journal files;
            // those must see true scratch sizes.
            if name == "metadata.db" || is_generated_filename(name) {
                if let Some(container) = archive_name_of(fuse_path)
                    .and_then(|archive| state.metadata_containers.get(archive))
                {
                    size = container.size_of(name).unwrap_or(0);
                }
            }
            return Ok(file_attr(ino, size, FILE_PERM, self.uid, self.gid, epoch));
        }
        Err(Errno::ENOENT)
    }

    fn path_for(&self, ino: INodeNo) -> Option<String> {
        self.state.lock().inodes.path(ino.0).map(str::to_string)
    }

    /// Concatenates the container into the merged object and uploads it,
    /// then deletes the scratch subdirectory.
    fn upload_merged_metadata(
        &self,
        archive_name: &str,
        mut container: MetadataContainer,
    ) -> crate::error::Result<()> {
        let key = self
            .config
            .prefixed_key(&format!("/{archive_name}/{MERGED_METADATA_OBJECT_NAME}"));
        let mut upload = UploadStream::open(&self.connection, key.clone())?;
        container.merge_into(&mut upload).map_err(Error::Io)?;
        upload.finish()?;
        info!(key = %key, "streamed merged metadata to object store");

        if let Err(err) = container.remove_scratch() {
            warn!(archive = archive_name, %err, "failed to remove metadata scratch directory");
        }
        Ok(())
    }
}

impl Filesystem for ArchiveWriteFs {
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
        let Some(name) = name.to_str().map(str::to_string) else {
            reply.error(Errno::EIO);
            return;
        };
        let mut state = self.state.lock();
        let Some(parent_path) = state.inodes.path(parent.0).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let fuse_path = InodeTable::child_path(&parent_path, &name);
        debug!(path = %fuse_path, "create");

        if Self::is_container_filename(&name) {
            let Some(archive_name) = archive_name_of(&fuse_path).map(str::to_string) else {
                error!(path = %fuse_path, "metadata file created outside an archive directory");
                reply.error(Errno::EIO);
                return;
            };
            if !state.metadata_containers.contains_key(&archive_name) {
                match MetadataContainer::create(&self.mount_cache_path, &archive_name) {
                    Ok(container) => {
                        state
                            .metadata_containers
                            .insert(archive_name.clone(), container);
                    }
                    Err(err) => {
                        error!(archive = %archive_name, %err, "failed to allocate metadata scratch");
                        reply.error(Errno::EIO);
                        return;
                    }
                }
            }
            let container = state
                .metadata_containers
                .get_mut(&archive_name)
                .expect("container inserted above");
            if let Err(err) = container.open_for_writing(&name) {
                error!(path = %fuse_path, %err, "failed to open metadata scratch file");
                reply.error(Errno::EIO);
                return;
            }
        } else {
            // Segment files are large and stream straight to the store.
            let key = self.config.prefixed_key(&fuse_path);
            match UploadStream::open(&self.connection, key) {
                Ok(stream) => {
                    state.object_streams.insert(fuse_path.clone(), stream);
                }
                Err(err) => {
                    error!(path = %fuse_path, %err, "failed to open upload stream");
                    reply.error(errno_for(&err));
                    return;
                }
            }
        }

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

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        // Consumers of this mount write by known paths; listing only
        // needs the standard entries.
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

    fn open(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        let Some(fuse_path) = self.path_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        debug!(path = %fuse_path, "open");
        let name = basename(&fuse_path).to_string();

        if is_generated_filename(&name) {
            // The compressor's database layer reopens its journal files.
            let mut state = self.state.lock();
            let container = archive_name_of(&fuse_path)
                .and_then(|archive| state.metadata_containers.get_mut(archive));
            match container {
                Some(container) => match container.open_for_writing(&name) {
                    Ok(()) => reply.opened(FileHandle(0), FopenFlags::FOPEN_KEEP_CACHE),
                    Err(err) => {
                        error!(path = %fuse_path, %err, "failed to reopen scratch file");
                        reply.error(Errno::EIO);
                    }
                },
                None => reply.error(Errno::EIO),
            }
            return;
        }

        // Only creation of new files is supported.
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
        let name = basename(&fuse_path).to_string();
        let offset = offset.max(0) as u64;
        let mut state = self.state.lock();

        if Self::is_container_filename(&name) {
            let container = archive_name_of(&fuse_path)
                .and_then(|archive| state.metadata_containers.get_mut(archive));
            match container {
                Some(container) => match container.write(&name, data, offset) {
                    Ok(written) => reply.written(written as u32),
                    Err(err) => {
                        error!(path = %fuse_path, %err, "scratch write failed");
                        reply.error(Errno::EIO);
                    }
                },
                None => reply.error(Errno::EIO),
            }
            return;
        }

        match state.object_streams.get_mut(&fuse_path) {
            Some(stream) => match stream.write_at(data, offset) {
                Ok(written) => reply.written(written as u32),
                Err(err) => {
                    error!(path = %fuse_path, %err, "upload write failed");
                    reply.error(errno_for(&err));
                }
            },
            None => reply.error(Errno::EIO),
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
        debug!(path = %fuse_path, "read");
        let name = basename(&fuse_path).to_string();

        // The compressor re-reads its database and journal files while
        // writing them; every other staged file is write-only.
        if name == "metadata.db" || is_generated_filename(&name) {
            let state = self.state.lock();
            if let Some(container) = archive_name_of(&fuse_path)
                .and_then(|archive| state.metadata_containers.get(archive))
            {
                match container.read(&name, offset, size as usize) {
                    Ok(data) => reply.data(&data),
                    Err(err) => {
                        error!(path = %fuse_path, %err, "scratch read failed");
                        reply.error(Errno::EIO);
                    }
                }
                return;
            }
            debug!(path = %fuse_path, "no active metadata container");
        }
        reply.error(Errno::EACCES);
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
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
        if size.is_some() {
            // Truncation of staged or streamed objects is unsupported.
            reply.error(Errno::EROFS);
            return;
        }
        let state = self.state.lock();
        let Some(fuse_path) = state.inodes.path(ino.0).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        if mode.is_some() {
            debug!(path = %fuse_path, ?mode, "chmod ignored");
        }
        match self.attr_for_path(&state, &fuse_path, ino.0) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(Errno::EROFS);
            return;
        };
        let mut state = self.state.lock();
        let Some(parent_path) = state.inodes.path(parent.0).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let fuse_path = InodeTable::child_path(&parent_path, name);
        debug!(path = %fuse_path, "unlink");

        if is_generated_filename(name) {
            if let Some(container) = archive_name_of(&fuse_path)
                .and_then(|archive| state.metadata_containers.get_mut(archive))
            {
                match container.unlink(name) {
                    Ok(()) => reply.ok(),
                    Err(err) => {
                        error!(path = %fuse_path, %err, "failed to unlink scratch file");
                        reply.error(Errno::EIO);
                    }
                }
                return;
            }
            debug!(path = %fuse_path, "unlink without an active container");
        }
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
        let name = basename(&fuse_path).to_string();
        let mut state = self.state.lock();

        if Self::is_container_filename(&name) {
            let Some(archive_name) = archive_name_of(&fuse_path).map(str::to_string) else {
                reply.ok();
                return;
            };
            let merged = match state.metadata_containers.get_mut(&archive_name) {
                Some(container) => {
                    container.close(&name);
                    container.all_metadata_released()
                }
                None => false,
            };
            if merged {
                let container = state
                    .metadata_containers
                    .remove(&archive_name)
                    .expect("container present");
                // The upload runs on the dispatch thread; the mount is
                // quiescing at this point by construction.
                if let Err(err) = self.upload_merged_metadata(&archive_name, container) {
                    error!(archive = %archive_name, %err, "merged metadata upload failed");
                    reply.error(errno_for(&err));
                    return;
                }
            }
            reply.ok();
            return;
        }

        match state.object_streams.remove(&fuse_path) {
            Some(stream) => match stream.finish() {
                Ok(()) => {
                    debug!(path = %fuse_path, "streamed segment to object store");
                    reply.ok();
                }
                Err(err) => {
                    error!(path = %fuse_path, %err, "segment upload failed");
                    reply.error(errno_for(&err));
                }
            },
            None => reply.ok(),
        }
    }
}
