//! S3 path handling and per-mount configuration.
//!
//! An `S3MountConfig` carries the credential triple, the endpoint, and a
//! single validated absolute path prefix `/<bucket>/<key-prefix>`. All
//! conversions between object keys, mount-relative paths, and URIs are
//! pure string joins over the prefix fields, so they can never disagree
//! with each other.

use crate::error::{Error, Result};

// ── Path validation ──────────────────────────────────────────────────────────

/// Outcome of checking an S3 path string for structural problems.
#[derive(Debug, Clone, Copy)]
struct PathCheck {
    /// The path contains redundant characters (`//`, `./`) beyond at most
    /// one trailing slash.
    redundant: bool,
    absolute: bool,
    trailing_slash: bool,
}

/// Collapses empty and `.` segments. Keeps `..` segments verbatim; S3
/// keys may legitimately contain them.
fn normalize_s3_path(path: &str) -> String {
    let parts: Vec<&str> = path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if path.starts_with('/') {
        if parts.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", parts.join("/"))
        }
    } else {
        parts.join("/")
    }
}

fn check_s3_path(path: &str) -> PathCheck {
    let absolute = path.starts_with('/');
    let cleaned = normalize_s3_path(path);

    if cleaned == path {
        return PathCheck {
            redundant: false,
            absolute,
            trailing_slash: false,
        };
    }
    if path.len() > 1 && path.ends_with('/') && cleaned == path[..path.len() - 1] {
        return PathCheck {
            redundant: false,
            absolute,
            trailing_slash: true,
        };
    }
    PathCheck {
        redundant: true,
        absolute,
        trailing_slash: false,
    }
}

// ── Mount configuration ──────────────────────────────────────────────────────

/// Immutable per-mount parameters.
///
/// Streams and worker threads receive clones; nothing mutates a config
/// after construction.
#[derive(Debug, Clone)]
pub struct S3MountConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub endpoint_url: String,

    /// Normalized absolute `/<bucket>[/<key-prefix>]`.
    s3_path_prefix: String,
    bucket: String,
    /// Key prefix used for listing; keeps the caller's trailing slash so
    /// a prefix of `logs/` does not also match `logs-old/`.
    key_prefix: String,
    /// Prefix removed from `/<bucket>/<key>` when rendering mount paths,
    /// and re-joined when resolving them back to objects. Empty when no
    /// strip prefix was configured; otherwise ends with `/` exactly when
    /// reconstruction is a plain concatenation with a relative remainder.
    reconstruction_prefix: String,
}

impl S3MountConfig {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        endpoint_url: impl Into<String>,
        s3_path_prefix: &str,
        strip_prefix: Option<&str>,
    ) -> Result<Self> {
        let check = check_s3_path(s3_path_prefix);
        if check.redundant {
            return Err(Error::RedundantPathCharacters(s3_path_prefix.to_string()));
        }
        if !check.absolute {
            return Err(Error::PathNotAbsolute(s3_path_prefix.to_string()));
        }
        let cleaned_prefix = normalize_s3_path(s3_path_prefix);

        let without_root = &cleaned_prefix[1..];
        let (bucket, key) = match without_root.split_once('/') {
            Some((bucket, key)) => (bucket.to_string(), key.to_string()),
            None => (without_root.to_string(), String::new()),
        };
        let mut key_prefix = key;
        if !key_prefix.is_empty() && check.trailing_slash {
            key_prefix.push('/');
        }

        let reconstruction_prefix = match strip_prefix {
            None => String::new(),
            Some(strip) => {
                if !cleaned_prefix.starts_with(strip) {
                    return Err(Error::PrefixMismatch {
                        strip_prefix: strip.to_string(),
                        path: cleaned_prefix,
                    });
                }
                let mut reconstruction = strip.to_string();
                let leftover = &cleaned_prefix[strip.len()..];
                // When the remainder is empty or begins with a slash, the
                // strip prefix ends on a segment boundary and paths join
                // back with a separator.
                if leftover.is_empty() || leftover.starts_with('/') {
                    reconstruction.push('/');
                }
                reconstruction
            }
        };

        Ok(S3MountConfig {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
            endpoint_url: endpoint_url.into(),
            s3_path_prefix: cleaned_prefix,
            bucket,
            key_prefix,
            reconstruction_prefix,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object-key prefix below the bucket; the listing scope of the mount.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn path_prefix(&self) -> &str {
        &self.s3_path_prefix
    }

    /// `s3://<bucket>/<key-prefix>` — the prefix is absolute, so one
    /// slash of the scheme separator comes from it.
    pub fn s3_uri_prefix(&self) -> String {
        format!("s3:/{}", self.s3_path_prefix)
    }

    /// Converts an object key into its mount-relative path.
    ///
    /// Fails when the key is absolute, contains redundant characters, or
    /// ends with `/` — objects named like directories are not
    /// representable in the mount.
    pub fn fuse_path_for_key(&self, key: &str) -> Result<String> {
        let check = check_s3_path(key);
        if check.redundant || check.absolute || check.trailing_slash {
            return Err(Error::RedundantPathCharacters(key.to_string()));
        }

        let full = format!("/{}/{}", self.bucket, key);
        let stripped = full
            .strip_prefix(self.reconstruction_prefix.as_str())
            .unwrap_or(&full);
        if stripped.starts_with('/') {
            Ok(stripped.to_string())
        } else {
            Ok(format!("/{stripped}"))
        }
    }

    /// Rebuilds the absolute `/bucket/...` S3 path for a mount-relative
    /// path produced by [`Self::fuse_path_for_key`].
    fn reconstructed_path(&self, fuse_path: &str) -> String {
        if self.reconstruction_prefix.is_empty() {
            fuse_path.to_string()
        } else {
            let relative = fuse_path.strip_prefix('/').unwrap_or(fuse_path);
            format!("{}{}", self.reconstruction_prefix, relative)
        }
    }

    /// Object key for a mount-relative path, undoing the strip prefix.
    pub fn reconstructed_key(&self, fuse_path: &str) -> String {
        let full = self.reconstructed_path(fuse_path);
        full[1 + self.bucket.len()..]
            .trim_start_matches('/')
            .to_string()
    }

    /// Object key for a path interpreted directly below the configured
    /// path prefix (the addressing used by the CLP and write mounts).
    pub fn prefixed_key(&self, fuse_path: &str) -> String {
        let full = format!("{}{}", self.s3_path_prefix, fuse_path);
        full[1 + self.bucket.len()..]
            .trim_start_matches('/')
            .to_string()
    }

    /// `s3://` URI for a mount-relative path; used for log messages.
    pub fn uri_for_path(&self, fuse_path: &str) -> String {
        format!("s3:/{}", self.reconstructed_path(fuse_path))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_doubled_slashes() {
        assert_eq!(normalize_s3_path("/bucket//key"), "/bucket/key");
    }

    #[test]
    fn normalize_drops_dot_segments() {
        assert_eq!(normalize_s3_path("a/./b"), "a/b");
    }

    #[test]
    fn normalize_keeps_root() {
        assert_eq!(normalize_s3_path("/"), "/");
    }

    #[test]
    fn clean_absolute_path_passes_check() {
        let check = check_s3_path("/bucket/key");
        assert!(!check.redundant);
        assert!(check.absolute);
        assert!(!check.trailing_slash);
    }

    #[test]
    fn trailing_slash_is_flagged_but_not_redundant() {
        let check = check_s3_path("/bucket/key/");
        assert!(!check.redundant);
        assert!(check.trailing_slash);
    }

    #[test]
    fn doubled_slash_is_redundant() {
        assert!(check_s3_path("/bucket//key").redundant);
    }
}
