// Tests for the writer-side metadata container.
//
// The merged layout is byte-exact: a header of N−1 little-endian u32 end
// offsets (absolute, header included) followed by the N file bodies in
// canonical order.

use remote_fuse::archive::{MetadataContainer, METADATA_FILENAMES, METADATA_GENERATED_FILES};
use tempfile::TempDir;

const ARCHIVE: &str = "550e8400-e29b-41d4-a716-446655440000";

fn filled_container(dir: &TempDir, bodies: &[&[u8]; 6]) -> MetadataContainer {
    let mut container = MetadataContainer::create(dir.path(), ARCHIVE).unwrap();
    for (filename, body) in METADATA_FILENAMES.iter().copied().zip(bodies.iter().copied()) {
        container.open_for_writing(filename).unwrap();
        container.write(filename, body, 0).unwrap();
        container.close(filename);
    }
    container
}

/// Header offsets accumulate body sizes on top of the 20-byte header,
/// and bodies follow in canonical order.
#[test]
fn merge_writes_header_and_bodies_in_canonical_order() {
    let dir = TempDir::new().unwrap();
    let bodies: [&[u8]; 6] = [b"L", b"SS", b"MMM", b"DDDD", b"Vd", b"Vs"];
    let mut container = filled_container(&dir, &bodies);

    let mut merged = Vec::new();
    container.merge_into(&mut merged).unwrap();

    // Header: 20 + |L|, then cumulative.
    let expected_ends: [u32; 5] = [21, 23, 26, 30, 32];
    for (i, end) in expected_ends.iter().enumerate() {
        let field = u32::from_le_bytes(merged[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(field, *end, "offset {i}");
    }
    assert_eq!(&merged[20..], b"LSSMMMDDDDVdVs");
}

/// Files that were created but never written contribute empty bodies.
#[test]
fn merge_handles_empty_files() {
    let dir = TempDir::new().unwrap();
    let bodies: [&[u8]; 6] = [b"", b"ab", b"", b"cd", b"", b""];
    let mut container = filled_container(&dir, &bodies);

    let mut merged = Vec::new();
    container.merge_into(&mut merged).unwrap();

    let expected_ends: [u32; 5] = [20, 22, 22, 24, 24];
    for (i, end) in expected_ends.iter().enumerate() {
        let field = u32::from_le_bytes(merged[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(field, *end, "offset {i}");
    }
    assert_eq!(&merged[20..], b"abcd");
}

/// The merge trigger requires every canonical file to have been opened
/// and released; generated files do not participate.
#[test]
fn merge_trigger_tracks_canonical_files_only() {
    let dir = TempDir::new().unwrap();
    let mut container = MetadataContainer::create(dir.path(), ARCHIVE).unwrap();
    assert!(!container.all_metadata_released());

    for filename in METADATA_FILENAMES.iter().copied().take(5) {
        container.open_for_writing(filename).unwrap();
        container.close(filename);
    }
    assert!(!container.all_metadata_released());

    let last = METADATA_FILENAMES[5];
    container.open_for_writing(last).unwrap();
    assert!(!container.all_metadata_released()); // still open
    container.close(last);
    assert!(container.all_metadata_released());

    // A generated file left open does not block the merge.
    container.open_for_writing(METADATA_GENERATED_FILES[0]).unwrap();
    assert!(container.all_metadata_released());
}

/// Out-of-order writes extend the high-water mark, and re-reads see the
/// staged bytes.
#[test]
fn writes_track_high_water_mark_and_are_readable() {
    let dir = TempDir::new().unwrap();
    let mut container = MetadataContainer::create(dir.path(), ARCHIVE).unwrap();
    let name = "metadata.db";
    container.open_for_writing(name).unwrap();

    container.write(name, b"abcd", 0).unwrap();
    container.write(name, b"xy", 8).unwrap();
    assert_eq!(container.size_of(name), Some(10));

    let head = container.read(name, 0, 4).unwrap();
    assert_eq!(head, b"abcd");
    let clamped = container.read(name, 8, 16).unwrap();
    assert_eq!(clamped, b"xy");
}

/// Reopening a scratch file truncates it, like the database layer
/// expects for its journal files.
#[test]
fn reopen_truncates_scratch_file() {
    let dir = TempDir::new().unwrap();
    let mut container = MetadataContainer::create(dir.path(), ARCHIVE).unwrap();
    let journal = METADATA_GENERATED_FILES[0];

    container.open_for_writing(journal).unwrap();
    container.write(journal, b"journal-bytes", 0).unwrap();
    container.close(journal);

    container.open_for_writing(journal).unwrap();
    assert_eq!(container.size_of(journal), Some(0));
}

/// Unlink drops the scratch file; a second unlink is a no-op.
#[test]
fn unlink_removes_scratch_file() {
    let dir = TempDir::new().unwrap();
    let mut container = MetadataContainer::create(dir.path(), ARCHIVE).unwrap();
    let wal = METADATA_GENERATED_FILES[1];
    container.open_for_writing(wal).unwrap();
    container.write(wal, b"w", 0).unwrap();
    container.close(wal);

    container.unlink(wal).unwrap();
    assert!(!container.archive_dir().join(wal).exists());
    container.unlink(wal).unwrap();
}

/// Scratch cleanup removes the archive subdirectory entirely.
#[test]
fn remove_scratch_deletes_archive_directory() {
    let dir = TempDir::new().unwrap();
    let container = MetadataContainer::create(dir.path(), ARCHIVE).unwrap();
    let scratch = container.archive_dir().to_path_buf();
    assert!(scratch.exists());

    container.remove_scratch().unwrap();
    assert!(!scratch.exists());
}
