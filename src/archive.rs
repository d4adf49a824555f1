//! Archive layout: canonical metadata filenames, the writer-side scratch
//! container, and the merged-metadata object format.
//!
//! An archive is a directory immediately beneath the mount root whose
//! name is a UUIDv4. Its six small metadata files travel as one merged
//! object with a fixed offset header; segment files are standalone
//! objects streamed whole.

pub mod container;
pub mod merged;

pub use container::MetadataContainer;
pub use merged::{split_merged_metadata, MERGED_HEADER_LEN};

use uuid::{Uuid, Version};

/// Canonical per-archive metadata filenames, in merged-object order.
/// The last file extends to the end of the merged object.
pub const METADATA_FILENAMES: [&str; 6] = [
    "logtype.dict",
    "logtype.segindex",
    "metadata",
    "metadata.db",
    "var.dict",
    "var.segindex",
];

/// Transient files the compressor creates next to `metadata.db`; staged
/// locally, never uploaded.
pub const METADATA_GENERATED_FILES: [&str; 2] = ["metadata.db-journal", "metadata.db-wal"];

/// Object name of an archive's merged metadata.
pub const MERGED_METADATA_OBJECT_NAME: &str = "merged_metadata";

pub fn is_metadata_filename(name: &str) -> bool {
    METADATA_FILENAMES.contains(&name)
}

pub fn is_generated_filename(name: &str) -> bool {
    METADATA_GENERATED_FILES.contains(&name)
}

/// Whether `name` looks like an archive directory (a UUIDv4).
pub fn is_archive_name(name: &str) -> bool {
    match Uuid::parse_str(name) {
        Ok(uuid) => uuid.get_version() == Some(Version::Random),
        Err(_) => false,
    }
}

/// Cache key for one metadata file of one archive.
pub fn metadata_cache_key(archive_name: &str, filename: &str) -> String {
    format!("/{archive_name}/{filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid4_names_are_archives() {
        assert!(is_archive_name("550e8400-e29b-41d4-a716-446655440000"));
    }

    #[test]
    fn non_uuid_names_are_not_archives() {
        assert!(!is_archive_name("s"));
        assert!(!is_archive_name("metadata.db"));
        assert!(!is_archive_name("550e8400"));
    }

    #[test]
    fn uuid1_names_are_not_archives() {
        // Version nibble says time-based, not random.
        assert!(!is_archive_name("550e8400-e29b-11d4-a716-446655440000"));
    }
}
