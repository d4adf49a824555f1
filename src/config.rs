// config.rs — Compile-time tunables for the FUSE layer.
//
// Runtime configuration (credentials, endpoint, path prefix) lives in
// `s3path::S3MountConfig`; everything here is a fixed default chosen for
// the sequential access patterns the mounts are optimized for.

use std::time::Duration;

/// Network buffer size for sequential read streams. Objects whose listed
/// size is at or below this threshold are drained into memory at open and
/// served without holding a network stream.
pub const SEQUENTIAL_READ_BUFFER_SIZE: usize = 128 * 1024;

/// Chunk size used when draining local scratch files into an upload
/// stream during the merged-metadata flush.
pub const SEQUENTIAL_WRITE_BUFFER_SIZE: usize = 128 * 1024;

/// Synthetic `st_size` reported for streamed files whose real size is
/// unknown to the CLP read mount. Readers discover end-of-data at EOF.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Capacity of the pre-opened stream hand-off queue. The pre-opener
/// blocks once this many streams are waiting to be consumed.
pub const PREOPENED_QUEUE_CAPACITY: usize = 16;

/// Number of recyclable read streams seeded into the pre-opener pool.
pub const DEFAULT_PREOPENED_STREAM_COUNT: usize = 16;

/// Capacity of the metadata-download request queue.
pub const CACHE_REQUEST_QUEUE_CAPACITY: usize = 500;

/// Number of in-flight buffers between a FUSE write handler and its
/// upload worker thread. Bounds memory per open upload stream.
pub const UPLOAD_CHANNEL_CAPACITY: usize = 8;

/// Poll interval while waiting for the metadata downloader to populate
/// the cache.
pub const METADATA_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Interval between "still waiting" warnings while blocked on the
/// metadata cache.
pub const METADATA_WAIT_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on a metadata-cache wait before the read fails with EIO.
pub const METADATA_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Lifetime of presigned object URLs backing read streams. Streams are
/// short-lived relative to this; expiry only needs to outlast a mount's
/// longest single-object scan.
pub const PRESIGNED_URL_EXPIRY_SECS: u32 = 6 * 3600;
