//! Object operations outside the upload path: delete, download, list.
//!
//! Delete and download go through the same presigned redirect as the
//! single-shot upload: the gateway answers with a `Location` and the
//! operation is replayed against it without credentials.

use std::path::{Path, PathBuf};

use maap_s3_protocol::constants::{object_path, params};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::client::{GatewayClient, check_status};
use crate::error::GatewayError;

impl GatewayClient {
    /// Deletes `key` from the bucket.
    pub async fn delete_object(&self, key: &str) -> Result<(), GatewayError> {
        let url = self.url(&object_path(key));
        let location = self.presigned_location(|| self.api().delete(&url)).await?;

        let resp = self.bulk().delete(&location).send().await?;
        check_status(resp).await?;

        info!(key = %key, "object deleted");
        Ok(())
    }

    /// Downloads `key` into `local_path`, streaming chunk by chunk.
    ///
    /// The body is written to `<local_path>.part` and renamed into place
    /// once complete, so a failed transfer leaves an existing file intact.
    /// Returns the number of bytes written.
    pub async fn download_object(
        &self,
        key: &str,
        local_path: &Path,
    ) -> Result<u64, GatewayError> {
        let url = self.url(&object_path(key));
        let location = self.presigned_location(|| self.api().get(&url)).await?;

        let resp = check_status(self.bulk().get(&location).send().await?).await?;

        let partial = partial_path(local_path);
        let bytes = match write_body(resp, &partial).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, local_path).await?;

        info!(key = %key, path = %local_path.display(), bytes, "object downloaded");
        Ok(bytes)
    }

    /// Lists objects under `prefix`. The gateway's body is returned verbatim.
    pub async fn list_objects(&self, prefix: &str) -> Result<String, GatewayError> {
        let url = self.url(&object_path(prefix));
        let resp = self
            .send_authorized(|| self.api().get(&url).query(&[(params::LIST, "true")]))
            .await?;
        Ok(resp.text().await?)
    }
}

fn partial_path(local_path: &Path) -> PathBuf {
    let mut name = local_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn write_body(mut resp: reqwest::Response, local_path: &Path) -> Result<u64, GatewayError> {
    let mut file = tokio::fs::File::create(local_path).await?;
    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
