//! Session and request plumbing for one object-store endpoint.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use tracing::debug;

use crate::config::PRESIGNED_URL_EXPIRY_SECS;
use crate::error::{Error, Result};
use crate::s3path::S3MountConfig;

/// One independent client session: a bucket handle for signed API calls
/// and a plain HTTP client for streaming presigned object bodies.
///
/// Worker threads and streams each construct (or clone the bucket of)
/// their own connection; connections are never shared mutably.
pub struct Connection {
    bucket: Bucket,
    http: Client,
}

impl Connection {
    pub fn new(config: &S3MountConfig) -> Result<Self> {
        let credentials = Credentials::new(
            Some(&config.access_key_id),
            Some(&config.secret_access_key),
            None,
            config.session_token.as_deref(),
            None,
        )?;
        let region = Region::Custom {
            region: "us-east-1".to_string(),
            endpoint: config.endpoint_url.clone(),
        };
        // Path-style addressing: custom endpoints rarely resolve
        // bucket-name vhosts.
        let bucket = Bucket::new(config.bucket(), region, credentials)?.with_path_style();

        // Object bodies are streamed for arbitrarily long; the default
        // whole-request timeout would sever large sequential reads.
        let http = Client::builder().timeout(None::<Duration>).build()?;

        Ok(Connection { bucket, http })
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Lists every `(key, size)` under `key_prefix`, following
    /// continuation tokens until the listing is exhausted.
    pub fn list_objects(&self, key_prefix: &str) -> Result<Vec<(String, u64)>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let (page, _status) = self.bucket.list_page(
                key_prefix.to_string(),
                None,
                continuation_token.take(),
                None,
                None,
            )?;
            for object in page.contents {
                objects.push((object.key, object.size));
            }
            if !page.is_truncated {
                break;
            }
            continuation_token = page.next_continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }
        debug!(key_prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }

    /// Starts a streaming GET of `key` at `offset`.
    ///
    /// Returns `Ok(None)` when the requested range starts at or past the
    /// end of the object; callers treat that as EOF.
    pub(crate) fn open_ranged(&self, key: &str, offset: u64) -> Result<Option<Response>> {
        let url = self
            .bucket
            .presign_get(key, PRESIGNED_URL_EXPIRY_SECS, None)?;
        let response = self
            .http
            .get(url)
            .header(RANGE, format!("bytes={offset}-"))
            .send()?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::ObjectNotFound(key.to_string())),
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => match response.error_for_status() {
                Err(err) => Err(err.into()),
                Ok(_) => Err(Error::Io(std::io::Error::other(format!(
                    "unexpected status {status} reading object '{key}'"
                )))),
            },
        }
    }
}
