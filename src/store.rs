//! Thin object-store client and the per-object stream types built on it.
//!
//! Submodules:
//! - [`connection`] — bucket handle, signed requests, paginated listing
//! - [`read_stream`] — sequential-access-optimized read streams
//! - [`upload`]      — append-only multipart upload streams
//!
//! Every stream owns (or shares) exactly one [`Connection`]; nothing in
//! this module holds references back into mount state.

pub mod connection;
pub mod read_stream;
pub mod upload;

pub use connection::Connection;
pub use read_stream::{ManagedReadStream, ObjectReader};
pub use upload::UploadStream;
