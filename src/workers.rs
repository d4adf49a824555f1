//! Background worker threads: the read-mount pre-opener and the CLP
//! metadata downloader.
//!
//! Both run until shutdown, signaled by an event plus a `None` sentinel
//! posted on their input queue so a blocked `recv` wakes up. They exit
//! after finishing their current item and never abort the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use crate::archive::split_merged_metadata;
use crate::cache::{AttrCache, MetadataCache};
use crate::error::Result;
use crate::s3path::S3MountConfig;
use crate::store::{Connection, ManagedReadStream, ObjectReader};

/// One archive's merged-metadata fetch job.
pub struct MetadataFetchRequest {
    pub archive_name: String,
    pub object_key: String,
}

/// Walks the attribute cache in listing order and pre-opens a stream for
/// every file still marked `ordered_read_pending`, handing each to the
/// bounded pre-opened queue. Streams are acquired from (and eventually
/// returned to) the recycled queue, which bounds the total stream count.
///
/// After the walk, keeps draining the recycled queue so releases on the
/// mount thread never block, until shutdown.
pub fn preopener_thread(
    attr_cache: Arc<AttrCache>,
    recycled_rx: Receiver<Option<ManagedReadStream>>,
    preopened_tx: Sender<ManagedReadStream>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("object stream pre-opener started");

    for fuse_path in attr_cache.paths_in_listing_order() {
        let Some(metadata) = attr_cache.get(fuse_path) else {
            continue;
        };
        if !metadata.ordered_read_pending() {
            continue;
        }
        let mut stream = match recycled_rx.recv() {
            Ok(Some(stream)) => stream,
            Ok(None) | Err(_) => return,
        };
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        match stream.open(fuse_path, Some(metadata.size())) {
            Ok(()) => {
                debug!(path = fuse_path, "pre-opened object stream");
                if preopened_tx.send(stream).is_err() {
                    // Mount thread is gone.
                    return;
                }
            }
            Err(err) => {
                error!(path = fuse_path, %err, "failed to pre-open object stream");
            }
        }
    }
    debug!("object stream pre-opening completed");

    loop {
        match recycled_rx.recv() {
            Ok(Some(_stream)) => {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
            }
            Ok(None) | Err(_) => return,
        }
    }
}

/// Serves merged-metadata fetch requests: streams the merged object and
/// splits it into per-file cache entries. A failed fetch is logged and
/// leaves its entries absent; readers surface the stall through their
/// own wait-loop warnings.
pub fn metadata_downloader_thread(
    config: &S3MountConfig,
    metadata_cache: Arc<MetadataCache>,
    requests_rx: Receiver<Option<MetadataFetchRequest>>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("metadata downloader started");

    // The downloader holds its own session, independent of the mount
    // thread's streams.
    let connection = match Connection::new(config) {
        Ok(connection) => Arc::new(connection),
        Err(err) => {
            error!(%err, "metadata downloader could not create a connection");
            return;
        }
    };

    while !shutdown.load(Ordering::Relaxed) {
        let request = match requests_rx.recv() {
            Ok(Some(request)) => request,
            // Sentinel: re-check the shutdown event.
            Ok(None) => continue,
            Err(_) => break,
        };
        debug!(archive = %request.archive_name, "fetching merged metadata");
        if let Err(err) = fetch_merged_metadata(&connection, &metadata_cache, &request) {
            error!(
                archive = %request.archive_name,
                key = %request.object_key,
                %err,
                "merged metadata fetch failed"
            );
        }
    }
    debug!("metadata downloader stopped");
}

fn fetch_merged_metadata(
    connection: &Arc<Connection>,
    metadata_cache: &MetadataCache,
    request: &MetadataFetchRequest,
) -> Result<()> {
    let mut reader = ObjectReader::open(Arc::clone(connection), request.object_key.clone())?;
    split_merged_metadata(&mut reader, &request.archive_name, metadata_cache)?;
    Ok(())
}
