//! Gateway API client.
//!
//! Every call carries the bearer token from a [`TokenSource`]. A 401 or
//! 403 triggers one token refresh and one retry.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use maap_s3_protocol::constants::params;
use maap_s3_protocol::{Endpoint, PartRecord, PresignedUrlList};
use maap_s3_upload::{BoxFuture, PresignedUrlProvider, SingleShotUploader, UploadError};
use reqwest::header::{CONTENT_LENGTH, LOCATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, info};

use crate::auth::TokenSource;
use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Client for the S3 gateway.
pub struct GatewayClient {
    /// API calls. Redirects are not followed so `Location` can be read.
    api: reqwest::Client,
    /// Transfers to presigned URLs; no overall timeout.
    bulk: reqwest::Client,
    base_url: String,
    bucket: String,
    auth: Arc<dyn TokenSource>,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig, auth: Arc<dyn TokenSource>) -> Result<Self, GatewayError> {
        let api = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let bulk = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            api,
            bulk,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            auth,
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn bulk(&self) -> &reqwest::Client {
        &self.bulk
    }

    pub(crate) fn api(&self) -> &reqwest::Client {
        &self.api
    }

    /// Sends an authorised request built by `build`.
    ///
    /// Success and redirect statuses are returned; anything else becomes
    /// [`GatewayError::Api`].
    pub(crate) async fn send_authorized<F>(&self, build: F) -> Result<Response, GatewayError>
    where
        F: Fn() -> RequestBuilder,
    {
        let token = self.auth.bearer().await?;
        let resp = build().bearer_auth(&token).send().await?;

        let resp = if is_auth_failure(resp.status()) {
            debug!(
                status = resp.status().as_u16(),
                url = %resp.url(),
                "token rejected, refreshing"
            );
            let token = self.auth.refresh().await?;
            build().bearer_auth(&token).send().await?
        } else {
            resp
        };

        check_status(resp).await
    }

    /// Bucket-scoped query parameters for a multipart call.
    fn multipart_params(&self, destination_key: &str) -> Vec<(&'static str, String)> {
        vec![
            (params::BUCKET_NAME, self.bucket.clone()),
            (params::OBJECT_KEY, destination_key.to_string()),
        ]
    }

    async fn generate_upload_id(&self, destination_key: &str) -> Result<String, GatewayError> {
        let url = self.url(Endpoint::GenerateUploadId.path());
        let query = self.multipart_params(destination_key);
        let resp = self
            .send_authorized(|| self.api.get(&url).query(&query))
            .await?;

        let upload_id = resp.text().await?.trim().to_string();
        if upload_id.is_empty() {
            return Err(GatewayError::Unexpected(
                "gateway returned an empty upload id".into(),
            ));
        }
        Ok(upload_id)
    }

    async fn presigned_urls(
        &self,
        session_id: &str,
        destination_key: &str,
        part_numbers: &[u32],
    ) -> Result<BTreeMap<u32, String>, GatewayError> {
        let url = self.url(Endpoint::GeneratePresignedUrls.path());
        let mut query = self.multipart_params(destination_key);
        query.push((params::UPLOAD_ID, session_id.to_string()));
        query.push((params::NB_PARTS, part_numbers.len().to_string()));
        query.push((params::PART_NUMBERS, join_numbers(part_numbers)));

        let resp = self
            .send_authorized(|| self.api.get(&url).query(&query))
            .await?;
        let body = resp.text().await?;
        let urls = PresignedUrlList::from_body(&body)?.into_map(part_numbers)?;

        debug!(upload_id = %session_id, count = urls.len(), "presigned URLs issued");
        Ok(urls)
    }

    async fn complete_upload(
        &self,
        session_id: &str,
        destination_key: &str,
        parts: &[PartRecord],
    ) -> Result<(), GatewayError> {
        let url = self.url(Endpoint::CompleteMultipartUpload.path());
        let mut query = self.multipart_params(destination_key);
        query.push((params::UPLOAD_ID, session_id.to_string()));
        query.push((params::NB_PARTS, parts.len().to_string()));
        let manifest = serde_json::to_string(parts)?;

        self.send_authorized(|| {
            self.api
                .get(&url)
                .query(&query)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(manifest.clone())
        })
        .await?;

        info!(
            upload_id = %session_id,
            destination = %destination_key,
            parts = parts.len(),
            "multipart upload completed"
        );
        Ok(())
    }

    async fn abort_upload(
        &self,
        session_id: &str,
        destination_key: &str,
    ) -> Result<(), GatewayError> {
        let url = self.url(Endpoint::AbortMultipartUpload.path());
        let mut query = self.multipart_params(destination_key);
        query.push((params::UPLOAD_ID, session_id.to_string()));

        self.send_authorized(|| self.api.get(&url).query(&query))
            .await?;
        Ok(())
    }

    /// Sends an authorised request and returns its `Location` header.
    pub(crate) async fn presigned_location<F>(&self, build: F) -> Result<String, GatewayError>
    where
        F: Fn() -> RequestBuilder,
    {
        let resp = self.send_authorized(build).await?;
        location(&resp)
    }

    async fn upload_whole_file(
        &self,
        source_path: &Path,
        destination_key: &str,
    ) -> Result<(), GatewayError> {
        let url = self.url(&maap_s3_protocol::constants::object_path(destination_key));
        let location = self.presigned_location(|| self.api.put(&url)).await?;

        let file = tokio::fs::File::open(source_path).await?;
        let size = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));

        let resp = self
            .bulk
            .put(&location)
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;
        check_status(resp).await?;

        info!(destination = %destination_key, bytes = size, "object uploaded");
        Ok(())
    }
}

impl PresignedUrlProvider for GatewayClient {
    fn initiate<'a>(&'a self, destination_key: &'a str) -> BoxFuture<'a, String> {
        Box::pin(async move { Ok(self.generate_upload_id(destination_key).await?) })
    }

    fn upload_urls<'a>(
        &'a self,
        session_id: &'a str,
        destination_key: &'a str,
        part_numbers: &'a [u32],
    ) -> BoxFuture<'a, BTreeMap<u32, String>> {
        Box::pin(async move {
            Ok(self
                .presigned_urls(session_id, destination_key, part_numbers)
                .await?)
        })
    }

    fn complete<'a>(
        &'a self,
        session_id: &'a str,
        destination_key: &'a str,
        parts: &'a [PartRecord],
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.complete_upload(session_id, destination_key, parts)
                .await
                .map_err(GatewayError::into_completion)
        })
    }

    fn abort<'a>(&'a self, session_id: &'a str, destination_key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move { Ok(self.abort_upload(session_id, destination_key).await?) })
    }
}

impl SingleShotUploader for GatewayClient {
    fn put_object<'a>(
        &'a self,
        source_path: &'a Path,
        destination_key: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.upload_whole_file(source_path, destination_key)
                .await
                .map_err(UploadError::from)
        })
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// Passes success and redirect responses through; maps the rest to [`GatewayError::Api`].
pub(crate) async fn check_status(resp: Response) -> Result<Response, GatewayError> {
    let status = resp.status();
    if status.is_success() || status.is_redirection() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GatewayError::Api {
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn location(resp: &Response) -> Result<String, GatewayError> {
    resp.headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(GatewayError::MissingHeader("Location"))
}

fn join_numbers(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
