//! Crate-wide error type.
//!
//! Configuration errors surface at mount construction and prevent the
//! mount; stream and store errors surface per-operation and are mapped
//! to POSIX errnos at the filesystem boundary.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The configured S3 path (or an object key) contains redundant path
    /// characters such as `//` or `./`.
    #[error("S3 path '{0}' contains redundant path characters")]
    RedundantPathCharacters(String),

    /// The configured S3 path prefix is not absolute.
    #[error("S3 path '{0}' must be absolute")]
    PathNotAbsolute(String),

    /// The strip prefix is not a prefix of the configured S3 path.
    #[error("could not find prefix '{strip_prefix}' in '{path}'")]
    PrefixMismatch { strip_prefix: String, path: String },

    /// The object named by this key does not exist in the bucket.
    #[error("object '{0}' not found")]
    ObjectNotFound(String),

    /// An upload stream received a write whose offset does not continue
    /// the stream. Network uploads are append-only.
    #[error("non-sequential write at offset {offset}, expected {expected}")]
    NonSequentialWrite { expected: u64, offset: u64 },

    /// The background upload worker terminated before the stream was
    /// finished, typically because the transfer failed.
    #[error("upload worker for '{0}' terminated early")]
    UploadAborted(String),

    /// The mount directory exists but is not empty.
    #[error("mount directory '{0}' is not empty")]
    MountDirNotEmpty(PathBuf),

    /// A worker thread could not be spawned or joined.
    #[error("worker thread '{0}' panicked")]
    WorkerPanicked(&'static str),

    #[error(transparent)]
    Store(#[from] s3::error::S3Error),

    #[error(transparent)]
    Credentials(#[from] s3::creds::error::CredentialsError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
