// Tests for mount configuration and S3 path ↔ mount path conversion.
//
// Conversions must be pure string joins over the validated prefix, so
// key → path → key round-trips exactly, with and without a strip prefix.

use remote_fuse::{Error, S3MountConfig};

fn config(prefix: &str, strip: Option<&str>) -> S3MountConfig {
    S3MountConfig::new("key-id", "secret", None, "http://localhost:9000", prefix, strip).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction / validation
// ─────────────────────────────────────────────────────────────────────────────

/// A plain /<bucket>/<prefix> path parses into bucket and key prefix.
#[test]
fn parses_bucket_and_key_prefix() {
    let config = config("/logs-bucket/archives", None);
    assert_eq!(config.bucket(), "logs-bucket");
    assert_eq!(config.key_prefix(), "archives");
    assert_eq!(config.s3_uri_prefix(), "s3://logs-bucket/archives");
}

/// A bucket-only prefix has an empty key prefix (lists everything).
#[test]
fn bucket_only_prefix_has_empty_key_prefix() {
    let config = config("/logs-bucket", None);
    assert_eq!(config.bucket(), "logs-bucket");
    assert_eq!(config.key_prefix(), "");
}

/// A trailing slash is preserved on the key prefix so listing does not
/// match sibling prefixes, but removed from the normalized path.
#[test]
fn trailing_slash_scopes_key_prefix() {
    let config = config("/logs-bucket/archives/", None);
    assert_eq!(config.key_prefix(), "archives/");
    assert_eq!(config.path_prefix(), "/logs-bucket/archives");
}

/// Relative prefixes are rejected at construction.
#[test]
fn relative_prefix_is_rejected() {
    let err = S3MountConfig::new("k", "s", None, "http://x", "bucket/key", None).unwrap_err();
    assert!(matches!(err, Error::PathNotAbsolute(_)));
}

/// Redundant path characters are rejected at construction.
#[test]
fn redundant_prefix_is_rejected() {
    let err = S3MountConfig::new("k", "s", None, "http://x", "/bucket//key", None).unwrap_err();
    assert!(matches!(err, Error::RedundantPathCharacters(_)));
}

/// The strip prefix must actually prefix the configured path.
#[test]
fn mismatched_strip_prefix_is_rejected() {
    let err = S3MountConfig::new("k", "s", None, "http://x", "/bucket/a", Some("/other"))
        .unwrap_err();
    assert!(matches!(err, Error::PrefixMismatch { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Key → mount path
// ─────────────────────────────────────────────────────────────────────────────

/// Without a strip prefix, mount paths are /<bucket>/<key>.
#[test]
fn fuse_path_includes_bucket_without_strip_prefix() {
    let config = config("/logs-bucket/archives", None);
    assert_eq!(
        config.fuse_path_for_key("archives/a/x.bin").unwrap(),
        "/logs-bucket/archives/a/x.bin"
    );
}

/// With a strip prefix ending on a segment boundary, the remainder is
/// re-rooted at the mount.
#[test]
fn fuse_path_strips_configured_prefix() {
    let config = config("/logs-bucket/archives", Some("/logs-bucket"));
    assert_eq!(
        config.fuse_path_for_key("archives/a/x.bin").unwrap(),
        "/archives/a/x.bin"
    );
}

/// Stripping the entire prefix leaves paths relative to it.
#[test]
fn fuse_path_with_full_strip_prefix() {
    let config = config("/logs-bucket/archives", Some("/logs-bucket/archives"));
    assert_eq!(
        config.fuse_path_for_key("archives/a/x.bin").unwrap(),
        "/a/x.bin"
    );
}

/// Keys naming directory placeholders (trailing slash) are not
/// representable.
#[test]
fn trailing_slash_key_is_rejected() {
    let config = config("/logs-bucket", None);
    assert!(config.fuse_path_for_key("archives/a/").is_err());
}

/// Absolute keys and keys with redundant characters are rejected.
#[test]
fn malformed_keys_are_rejected() {
    let config = config("/logs-bucket", None);
    assert!(config.fuse_path_for_key("/archives/a").is_err());
    assert!(config.fuse_path_for_key("archives//a").is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Mount path → key / URI
// ─────────────────────────────────────────────────────────────────────────────

/// Reconstruction undoes the strip prefix exactly.
#[test]
fn reconstructed_key_round_trips() {
    for strip in [None, Some("/logs-bucket"), Some("/logs-bucket/archives")] {
        let config = config("/logs-bucket/archives", strip);
        let key = "archives/a/x.bin";
        let fuse_path = config.fuse_path_for_key(key).unwrap();
        assert_eq!(config.reconstructed_key(&fuse_path), key, "strip={strip:?}");
    }
}

/// A strip prefix ending mid-segment still reconstructs by plain
/// concatenation.
#[test]
fn reconstructed_key_with_mid_segment_strip_prefix() {
    let config = config("/logs-bucket/archives", Some("/logs-bucket/arch"));
    let fuse_path = config.fuse_path_for_key("archives/x").unwrap();
    assert_eq!(fuse_path, "/ives/x");
    assert_eq!(config.reconstructed_key(&fuse_path), "archives/x");
}

/// Prefixed keys address objects directly below the configured prefix.
#[test]
fn prefixed_key_joins_below_prefix() {
    let config = config("/logs-bucket/archives", None);
    assert_eq!(
        config.prefixed_key("/arch-1/merged_metadata"),
        "archives/arch-1/merged_metadata"
    );

    let bucket_only = config_without_key_prefix();
    assert_eq!(
        bucket_only.prefixed_key("/arch-1/merged_metadata"),
        "arch-1/merged_metadata"
    );
}

fn config_without_key_prefix() -> S3MountConfig {
    config("/logs-bucket", None)
}

/// Log URIs mirror the reconstruction join.
#[test]
fn uri_for_path_matches_reconstruction() {
    let config = config("/logs-bucket/archives", Some("/logs-bucket"));
    let fuse_path = config.fuse_path_for_key("archives/a/x.bin").unwrap();
    assert_eq!(
        config.uri_for_path(&fuse_path),
        "s3://logs-bucket/archives/a/x.bin"
    );
}
