//! Writer-side staging for one archive's metadata files.
//!
//! Each container owns a scratch subdirectory under the mount cache with
//! one file per canonical metadata filename plus the generated names.
//! Writes land in the scratch files; once every canonical file has been
//! written and released, the container is merged into a single object
//! with the offset header described in [`super::merged`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use crate::archive::{METADATA_FILENAMES, METADATA_GENERATED_FILES};
use crate::config::SEQUENTIAL_WRITE_BUFFER_SIZE;

// ── ContainerFile ────────────────────────────────────────────────────────────

struct ContainerFile {
    path: PathBuf,
    file: Option<File>,
    /// High-water mark of bytes written; the file's logical size.
    max_file_pos: u64,
    was_opened: bool,
}

impl ContainerFile {
    fn create_empty(path: PathBuf) -> io::Result<Self> {
        File::create(&path)?;
        Ok(ContainerFile {
            path,
            file: None,
            max_file_pos: 0,
            was_opened: false,
        })
    }

    fn open_for_writing(&mut self) -> io::Result<()> {
        self.file = Some(
            OpenOptions::new()
                .read(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?,
        );
        self.max_file_pos = 0;
        self.was_opened = true;
        Ok(())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| io::Error::other("metadata scratch file is not open"))?;
        file.write_all_at(buf, offset)?;
        self.max_file_pos = self.max_file_pos.max(offset + buf.len() as u64);
        Ok(buf.len())
    }

    /// Reads up to `length` bytes at `offset`, clamped to the logical
    /// size. Works whether or not the write handle is currently open.
    fn read_at(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let start = self.max_file_pos.min(offset);
        let end = self.max_file_pos.min(start + length as u64);
        let mut buf = vec![0u8; (end - start) as usize];
        if buf.is_empty() {
            return Ok(buf);
        }
        match self.file.as_ref() {
            Some(file) => file.read_exact_at(&mut buf, start)?,
            None => File::open(&self.path)?.read_exact_at(&mut buf, start)?,
        }
        Ok(buf)
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn size(&self) -> u64 {
        self.max_file_pos
    }

    fn unlink(&mut self) -> io::Result<()> {
        self.file = None;
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

// ── MetadataContainer ────────────────────────────────────────────────────────

/// Scratch container for one archive, keyed by metadata filename.
pub struct MetadataContainer {
    archive_dir: PathBuf,
    files: Vec<ContainerFile>,
}

/// Index of `name` within the container's file vector: canonical files
/// first, generated files after.
fn slot(name: &str) -> Option<usize> {
    METADATA_FILENAMES
        .iter()
        .chain(METADATA_GENERATED_FILES.iter())
        .position(|candidate| *candidate == name)
}

impl MetadataContainer {
    /// Allocates the scratch subdirectory with one empty file per
    /// canonical metadata filename plus the generated names.
    pub fn create(mount_cache_path: &Path, archive_name: &str) -> io::Result<Self> {
        let archive_dir = mount_cache_path.join(archive_name);
        fs::create_dir_all(&archive_dir)?;

        let mut files = Vec::with_capacity(METADATA_FILENAMES.len() + METADATA_GENERATED_FILES.len());
        for filename in METADATA_FILENAMES.iter().chain(METADATA_GENERATED_FILES.iter()) {
            files.push(ContainerFile::create_empty(archive_dir.join(filename))?);
        }
        Ok(MetadataContainer { archive_dir, files })
    }

    pub fn contains(&self, name: &str) -> bool {
        slot(name).is_some()
    }

    pub fn open_for_writing(&mut self, name: &str) -> io::Result<()> {
        let index = slot(name).ok_or_else(|| io::Error::other("unknown metadata filename"))?;
        self.files[index].open_for_writing()
    }

    pub fn write(&mut self, name: &str, buf: &[u8], offset: u64) -> io::Result<usize> {
        let index = slot(name).ok_or_else(|| io::Error::other("unknown metadata filename"))?;
        self.files[index].write_at(buf, offset)
    }

    pub fn read(&self, name: &str, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let index = slot(name).ok_or_else(|| io::Error::other("unknown metadata filename"))?;
        self.files[index].read_at(offset, length)
    }

    pub fn close(&mut self, name: &str) {
        if let Some(index) = slot(name) {
            self.files[index].close();
        }
    }

    pub fn size_of(&self, name: &str) -> Option<u64> {
        slot(name).map(|index| self.files[index].size())
    }

    pub fn unlink(&mut self, name: &str) -> io::Result<()> {
        let index = slot(name).ok_or_else(|| io::Error::other("unknown metadata filename"))?;
        self.files[index].unlink()
    }

    /// True once every canonical metadata file has been opened at least
    /// once and none remains open — the merge trigger.
    pub fn all_metadata_released(&self) -> bool {
        let canonical = &self.files[..METADATA_FILENAMES.len()];
        let done = canonical.iter().all(|f| f.was_opened && !f.is_open());
        if done {
            debug!("all metadata files closed");
        }
        done
    }

    /// Writes the merged object: `N−1` little-endian u32 end offsets for
    /// the first `N−1` canonical files, then all `N` bodies in canonical
    /// order. The last body runs to the end of the object.
    pub fn merge_into(&mut self, writer: &mut dyn Write) -> io::Result<()> {
        let num_offsets = METADATA_FILENAMES.len() - 1;
        let mut end_offset = (num_offsets * 4) as u64;
        for file in &self.files[..num_offsets] {
            end_offset += file.size();
            let end = u32::try_from(end_offset).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "merged metadata exceeds the 32-bit offset header",
                )
            })?;
            writer.write_u32::<LittleEndian>(end)?;
        }

        let mut chunk = vec![0u8; SEQUENTIAL_WRITE_BUFFER_SIZE];
        for file in &mut self.files[..METADATA_FILENAMES.len()] {
            file.close();
            let mut remaining = file.size();
            let mut offset = 0u64;
            while remaining > 0 {
                let want = chunk.len().min(remaining as usize);
                let read = file.read_at(offset, want)?;
                if read.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "metadata scratch file shorter than recorded size",
                    ));
                }
                writer.write_all(&read)?;
                offset += read.len() as u64;
                remaining -= read.len() as u64;
            }
        }
        writer.flush()
    }

    /// Deletes the scratch subdirectory. Call after the merged object
    /// has been uploaded.
    pub fn remove_scratch(self) -> io::Result<()> {
        fs::remove_dir_all(&self.archive_dir)
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }
}
