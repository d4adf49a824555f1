//! Reader-side decomposition of a merged-metadata object.
//!
//! Layout (byte-exact): `N−1` little-endian 32-bit end offsets — each
//! the absolute offset at which the corresponding canonical file ends —
//! followed by the `N` file bodies in canonical order. The last file has
//! no recorded end; it runs to the end of the object.

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::archive::{metadata_cache_key, METADATA_FILENAMES};
use crate::cache::MetadataCache;

/// Size of the offset header in bytes.
pub const MERGED_HEADER_LEN: usize = (METADATA_FILENAMES.len() - 1) * 4;

/// Splits a merged-metadata stream into per-file cache entries under
/// `/<archive>/<filename>`.
///
/// Entries become visible strictly in canonical order, so a reader that
/// observes the last canonical file can rely on all earlier ones being
/// present.
pub fn split_merged_metadata<R: Read>(
    reader: &mut R,
    archive_name: &str,
    cache: &MetadataCache,
) -> io::Result<()> {
    let num_offsets = METADATA_FILENAMES.len() - 1;
    let mut end_offsets = Vec::with_capacity(num_offsets);
    for _ in 0..num_offsets {
        end_offsets.push(u64::from(reader.read_u32::<LittleEndian>()?));
    }

    let mut previous_end = MERGED_HEADER_LEN as u64;
    for (filename, end_offset) in METADATA_FILENAMES.iter().copied().zip(end_offsets) {
        let length = end_offset.checked_sub(previous_end).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "merged metadata offsets are not monotonic",
            )
        })?;
        // Sized by the untrusted header; read incrementally rather than
        // pre-allocating the claimed length.
        let mut body = Vec::new();
        reader.by_ref().take(length).read_to_end(&mut body)?;
        if body.len() as u64 != length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "merged metadata ends before the recorded file boundary",
            ));
        }

        let key = metadata_cache_key(archive_name, filename);
        cache.insert(&key, &body)?;
        debug!(archive = archive_name, filename, length, "cached metadata file");
        previous_end = end_offset;
    }

    // Last canonical file: the remainder of the object.
    let filename = METADATA_FILENAMES[METADATA_FILENAMES.len() - 1];
    let key = metadata_cache_key(archive_name, filename);
    let length = cache.insert_from_reader(&key, reader)?;
    debug!(archive = archive_name, filename, length, "cached metadata file");
    Ok(())
}
