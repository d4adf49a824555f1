//! Sequential-access-optimized read streams.
//!
//! [`ObjectReader`] owns one live network stream over an object and a
//! `bytes_processed` counter tracking the expected next offset; a read at
//! any other offset re-issues a ranged request. [`ManagedReadStream`]
//! adds mount-path bookkeeping, an eager in-memory buffer for small
//! objects, and open/close recycling so the pre-opener can reuse
//! connections across objects.

use std::io::{self, Read};
use std::sync::Arc;

use tracing::debug;

use crate::config::SEQUENTIAL_READ_BUFFER_SIZE;
use crate::error::Result;
use crate::s3path::S3MountConfig;
use crate::store::Connection;

// ── ObjectReader ─────────────────────────────────────────────────────────────

/// A readable stream over one object, positioned at `bytes_processed`.
pub struct ObjectReader {
    connection: Arc<Connection>,
    key: String,
    body: Option<reqwest::blocking::Response>,
    bytes_processed: u64,
}

impl ObjectReader {
    /// Opens a stream at offset 0. Fails if the object does not exist.
    pub fn open(connection: Arc<Connection>, key: String) -> Result<Self> {
        let body = connection.open_ranged(&key, 0)?;
        Ok(ObjectReader {
            connection,
            key,
            body,
            bytes_processed: 0,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads up to `length` bytes at `offset`, seeking first when the
    /// offset does not continue the stream. Short only at end of data.
    pub fn read_at(&mut self, length: usize, offset: u64) -> Result<Vec<u8>> {
        if offset != self.bytes_processed {
            self.seek(offset)?;
        }
        let mut buf = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            match Read::read(self, &mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Replaces the network stream with one starting at `offset`.
    fn seek(&mut self, offset: u64) -> Result<()> {
        self.body = self.connection.open_ranged(&self.key, offset)?;
        self.bytes_processed = offset;
        Ok(())
    }
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(body) = self.body.as_mut() else {
            return Ok(0);
        };
        let n = body.read(buf)?;
        self.bytes_processed += n as u64;
        Ok(n)
    }
}

// ── ManagedReadStream ────────────────────────────────────────────────────────

/// A recyclable per-object read stream addressed by mount-relative path.
///
/// Each instance owns an independent connection so streams can be handed
/// between the pre-opener thread and the mount thread without sharing
/// network state. Closing a stream releases the object but keeps the
/// connection for the next `open`.
pub struct ManagedReadStream {
    config: S3MountConfig,
    connection: Arc<Connection>,
    prefetch_limit: u64,
    fuse_path: Option<String>,
    reader: Option<ObjectReader>,
    small_read_buf: Option<Vec<u8>>,
}

impl ManagedReadStream {
    pub fn new(config: &S3MountConfig) -> Result<Self> {
        Self::with_prefetch_limit(config, SEQUENTIAL_READ_BUFFER_SIZE as u64)
    }

    /// As [`Self::new`] with an explicit small-file prefetch threshold.
    pub fn with_prefetch_limit(config: &S3MountConfig, prefetch_limit: u64) -> Result<Self> {
        let connection = Arc::new(Connection::new(config)?);
        Ok(ManagedReadStream {
            config: config.clone(),
            connection,
            prefetch_limit,
            fuse_path: None,
            reader: None,
            small_read_buf: None,
        })
    }

    /// The mount path this stream currently serves, if open.
    pub fn fuse_path(&self) -> Option<&str> {
        self.fuse_path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some() || self.small_read_buf.is_some()
    }

    /// Opens the object behind `fuse_path`, closing any previous object
    /// first. When the listed size is at or below the prefetch limit the
    /// whole object is drained into memory and the network stream is
    /// released immediately.
    pub fn open(&mut self, fuse_path: &str, size_hint: Option<u64>) -> Result<()> {
        self.close();

        let key = self.config.reconstructed_key(fuse_path);
        debug!(uri = %self.config.uri_for_path(fuse_path), "opening object stream");
        let mut reader = ObjectReader::open(Arc::clone(&self.connection), key)?;

        match size_hint {
            Some(size) if size <= self.prefetch_limit => {
                let mut buf = Vec::with_capacity(size as usize);
                reader.read_to_end(&mut buf)?;
                self.small_read_buf = Some(buf);
            }
            _ => self.reader = Some(reader),
        }
        self.fuse_path = Some(fuse_path.to_string());
        Ok(())
    }

    /// Serves a read from the in-memory buffer when present, otherwise
    /// from the network stream. A closed stream reads as empty.
    pub fn read_at(&mut self, length: usize, offset: u64) -> Result<Vec<u8>> {
        if let Some(buf) = &self.small_read_buf {
            let start = buf.len().min(offset as usize);
            let end = buf.len().min(start + length);
            return Ok(buf[start..end].to_vec());
        }
        match self.reader.as_mut() {
            Some(reader) => reader.read_at(length, offset),
            None => Ok(Vec::new()),
        }
    }

    /// Releases the object; the stream can be re-opened on another path.
    pub fn close(&mut self) {
        self.reader = None;
        self.small_read_buf = None;
        self.fuse_path = None;
    }
}
