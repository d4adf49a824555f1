//! Append-only streaming uploads.
//!
//! A FUSE write handler pushes buffers into a bounded channel; a worker
//! thread drains the channel through [`ChannelReader`] into a multipart
//! `put_object_stream` upload. Dropping the sender side is end-of-file;
//! the worker then finalizes the object.

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::config::UPLOAD_CHANNEL_CAPACITY;
use crate::error::{Error, Result};
use crate::store::Connection;

// ── ChannelReader ────────────────────────────────────────────────────────────

/// Adapts the receiving end of a buffer channel into `io::Read` for the
/// upload worker. Disconnection of all senders reads as EOF.
pub(crate) struct ChannelReader {
    receiver: Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    pub(crate) fn new(receiver: Receiver<Vec<u8>>) -> Self {
        ChannelReader {
            receiver,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.current.len() {
            match self.receiver.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

// ── UploadStream ─────────────────────────────────────────────────────────────

/// A single network upload stream for one object key.
///
/// Writes must continue the stream: `bytes_processed` tracks the expected
/// next offset and a mismatched offset is an error, since a multipart
/// upload body cannot rewind.
pub struct UploadStream {
    key: String,
    sender: Option<Sender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
    bytes_processed: u64,
}

impl UploadStream {
    /// Starts the upload worker for `key`. The object is finalized when
    /// [`Self::finish`] is called (or the stream is dropped).
    pub fn open(connection: &Connection, key: String) -> Result<Self> {
        let (sender, receiver) = bounded::<Vec<u8>>(UPLOAD_CHANNEL_CAPACITY);
        let bucket = connection.bucket().clone();
        let worker_key = key.clone();
        let worker = thread::Builder::new()
            .name("object-upload".to_string())
            .spawn(move || -> Result<()> {
                let mut reader = ChannelReader::new(receiver);
                let _ = bucket.put_object_stream(&mut reader, &worker_key)?;
                debug!(key = %worker_key, "upload finalized");
                Ok(())
            })
            .map_err(Error::Io)?;

        Ok(UploadStream {
            key,
            sender: Some(sender),
            worker: Some(worker),
            bytes_processed: 0,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Appends `buf` at `offset`. The offset must equal the number of
    /// bytes already written.
    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        if offset != self.bytes_processed {
            return Err(Error::NonSequentialWrite {
                expected: self.bytes_processed,
                offset,
            });
        }
        self.push(buf)?;
        Ok(buf.len())
    }

    fn push(&mut self, buf: &[u8]) -> Result<()> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(Error::UploadAborted(self.key.clone()));
        };
        if sender.send(buf.to_vec()).is_err() {
            // The worker exited early; surface whatever killed it.
            self.sender = None;
            return Err(self.take_worker_error());
        }
        self.bytes_processed += buf.len() as u64;
        Ok(())
    }

    fn take_worker_error(&mut self) -> Error {
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(Err(err))) => err,
            Some(Ok(Ok(()))) => Error::UploadAborted(self.key.clone()),
            Some(Err(_)) => Error::WorkerPanicked("object-upload"),
            None => Error::UploadAborted(self.key.clone()),
        }
    }

    /// Signals end-of-data and blocks until the object is finalized.
    pub fn finish(mut self) -> Result<()> {
        self.sender = None;
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(Error::WorkerPanicked("object-upload")),
            None => Ok(()),
        }
    }
}

impl Write for UploadStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf)
            .map_err(|err| io::Error::other(err.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// Dropping without `finish` still closes the channel, letting the worker
// finalize the object in the background.
impl Drop for UploadStream {
    fn drop(&mut self) {
        self.sender = None;
        drop(self.worker.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    /// Chunks are surfaced in order and EOF follows sender disconnect.
    #[test]
    fn channel_reader_concatenates_chunks_in_order() {
        let (tx, rx) = bounded(4);
        tx.send(b"abc".to_vec()).unwrap();
        tx.send(b"defg".to_vec()).unwrap();
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdefg");
    }

    /// A short destination buffer splits a chunk across reads.
    #[test]
    fn channel_reader_serves_partial_chunks() {
        let (tx, rx) = bounded(1);
        tx.send(b"abcdef".to_vec()).unwrap();
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    /// Empty chunks do not terminate the stream.
    #[test]
    fn channel_reader_skips_empty_chunks() {
        let (tx, rx) = bounded(4);
        tx.send(Vec::new()).unwrap();
        tx.send(b"xy".to_vec()).unwrap();
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"xy");
    }
}
