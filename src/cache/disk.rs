//! Disk-backed metadata cache.
//!
//! Maps keys of the form `/<archive>/<metadata-filename>` to byte
//! slices stored as individual files under the cache root. Inserts are
//! atomic (temp file + rename, indexed only once complete), so a key
//! that is present is always fully readable. Single writer (the
//! downloader thread), single reader (the mount thread) per key.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

pub struct MetadataCache {
    root: PathBuf,
    /// key → entry size. Presence means the backing file is complete.
    index: Mutex<HashMap<String, u64>>,
}

impl MetadataCache {
    /// The cache root must already exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MetadataCache {
            root: root.into(),
            index: Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.lock().contains_key(key)
    }

    pub fn size_of(&self, key: &str) -> Option<u64> {
        self.index.lock().get(key).copied()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    /// Inserts `bytes` under `key`. A present key is left untouched.
    pub fn insert(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.insert_from_reader(key, &mut io::Cursor::new(bytes))
            .map(|_| ())
    }

    /// Streams `reader` to completion into the entry for `key`,
    /// returning the entry size. A present key is left untouched and the
    /// reader is not consumed.
    pub fn insert_from_reader(&self, key: &str, reader: &mut dyn Read) -> io::Result<u64> {
        if let Some(size) = self.size_of(key) {
            return Ok(size);
        }

        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".partial");
        let tmp_path = path.with_file_name(tmp_name);
        let size = {
            let mut tmp = File::create(&tmp_path)?;
            io::copy(reader, &mut tmp)?
        };
        fs::rename(&tmp_path, &path)?;

        self.index.lock().insert(key.to_string(), size);
        Ok(size)
    }

    /// Reads up to `length` bytes at `offset` from the entry for `key`.
    /// Returns `None` when the key is absent.
    pub fn read_at(&self, key: &str, offset: u64, length: usize) -> io::Result<Option<Vec<u8>>> {
        let Some(size) = self.size_of(key) else {
            return Ok(None);
        };
        let start = size.min(offset);
        let end = size.min(start + length as u64);
        let mut buf = vec![0u8; (end - start) as usize];

        if !buf.is_empty() {
            use std::os::unix::fs::FileExt;
            let file = File::open(self.entry_path(key))?;
            file.read_exact_at(&mut buf, start)?;
        }
        Ok(Some(buf))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Insert then read back the full entry and a sub-range.
    #[test]
    fn insert_and_read_at_ranges() {
        let dir = TempDir::new().unwrap();
        let cache = MetadataCache::new(dir.path());

        cache.insert("/arch/metadata", b"0123456789").unwrap();
        assert!(cache.contains("/arch/metadata"));
        assert_eq!(cache.size_of("/arch/metadata"), Some(10));

        let all = cache.read_at("/arch/metadata", 0, 10).unwrap().unwrap();
        assert_eq!(all, b"0123456789");
        let middle = cache.read_at("/arch/metadata", 3, 4).unwrap().unwrap();
        assert_eq!(middle, b"3456");
    }

    /// Reads past the end of the entry are clamped, not errors.
    #[test]
    fn read_at_clamps_to_entry_size() {
        let dir = TempDir::new().unwrap();
        let cache = MetadataCache::new(dir.path());
        cache.insert("/arch/var.dict", b"abc").unwrap();

        let tail = cache.read_at("/arch/var.dict", 2, 16).unwrap().unwrap();
        assert_eq!(tail, b"c");
        let past = cache.read_at("/arch/var.dict", 8, 4).unwrap().unwrap();
        assert!(past.is_empty());
    }

    /// A second insert under the same key does not clobber the first.
    #[test]
    fn insert_is_first_writer_wins() {
        let dir = TempDir::new().unwrap();
        let cache = MetadataCache::new(dir.path());
        cache.insert("/arch/metadata.db", b"first").unwrap();
        cache.insert("/arch/metadata.db", b"second").unwrap();

        let content = cache.read_at("/arch/metadata.db", 0, 16).unwrap().unwrap();
        assert_eq!(content, b"first");
    }

    /// Missing keys read as `None`.
    #[test]
    fn read_at_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = MetadataCache::new(dir.path());
        assert!(cache.read_at("/arch/absent", 0, 4).unwrap().is_none());
    }
}
