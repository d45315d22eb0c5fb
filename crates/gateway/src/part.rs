//! PUT of a single part to its presigned URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use maap_s3_protocol::constants::ETAG_HEADER;
use maap_s3_transfer::{PartRange, PartReader};
use maap_s3_upload::{BoxFuture, PartUploader, UploadError};
use tracing::debug;

use crate::error::GatewayError;

/// Uploads part bytes to presigned URLs.
///
/// Presigned URLs carry their own signature, so no bearer token is sent.
pub struct HttpPartUploader {
    http: reqwest::Client,
}

impl HttpPartUploader {
    /// Creates an uploader whose PUTs give up after `part_timeout`.
    pub fn new(part_timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(part_timeout).build()?;
        Ok(Self { http })
    }

    async fn put(
        &self,
        source_path: &Path,
        range: PartRange,
        url: &str,
    ) -> Result<String, UploadError> {
        let data = read_part(source_path.to_path_buf(), range).await?;
        let part_number = range.part_number;
        let transfer = |reason: String| UploadError::Transfer {
            part_number,
            reason,
        };

        let resp = self
            .http
            .put(url)
            .body(data)
            .send()
            .await
            .map_err(|e| transfer(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(transfer(format!("HTTP {}: {body}", status.as_u16())));
        }

        let etag = resp
            .headers()
            .get(ETAG_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| transfer(format!("response has no {ETAG_HEADER} header")))?;

        debug!(part = part_number, bytes = range.length, etag = %etag, "part stored");
        Ok(etag)
    }
}

/// Reads one part off the async runtime.
async fn read_part(path: PathBuf, range: PartRange) -> Result<Vec<u8>, UploadError> {
    tokio::task::spawn_blocking(move || {
        let mut reader = PartReader::open(&path)?;
        reader.read_part(&range)
    })
    .await
    .map_err(|e| UploadError::Transfer {
        part_number: range.part_number,
        reason: format!("read task failed: {e}"),
    })?
    .map_err(UploadError::from)
}

impl PartUploader for HttpPartUploader {
    fn upload_part<'a>(
        &'a self,
        source_path: &'a Path,
        range: PartRange,
        url: &'a str,
    ) -> BoxFuture<'a, String> {
        Box::pin(self.put(source_path, range, url))
    }
}
