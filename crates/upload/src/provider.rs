//! Collaborator traits.
//!
//! `maap-s3-gateway` implements these over HTTP.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use maap_s3_protocol::PartRecord;
use maap_s3_transfer::PartRange;

use crate::error::UploadError;

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Issues presigned part URLs and drives the remote multipart session.
pub trait PresignedUrlProvider: Send + Sync {
    /// Starts a multipart upload and returns the store's upload id.
    fn initiate<'a>(&'a self, destination_key: &'a str) -> BoxFuture<'a, String>;

    /// Returns one presigned PUT URL per requested part number.
    fn upload_urls<'a>(
        &'a self,
        session_id: &'a str,
        destination_key: &'a str,
        part_numbers: &'a [u32],
    ) -> BoxFuture<'a, BTreeMap<u32, String>>;

    /// Assembles the object from `parts`, sorted ascending by part number.
    ///
    /// A rejected manifest surfaces as [`UploadError::Completion`].
    fn complete<'a>(
        &'a self,
        session_id: &'a str,
        destination_key: &'a str,
        parts: &'a [PartRecord],
    ) -> BoxFuture<'a, ()>;

    /// Releases a multipart upload and any parts the store holds for it.
    fn abort<'a>(&'a self, session_id: &'a str, destination_key: &'a str) -> BoxFuture<'a, ()>;
}

/// Transfers one byte range of the source file to a presigned URL.
pub trait PartUploader: Send + Sync {
    /// Uploads `range` of `source_path` and returns the store-issued ETag.
    ///
    /// Network failures, timeouts and non-2xx responses surface as
    /// [`UploadError::Transfer`].
    fn upload_part<'a>(
        &'a self,
        source_path: &'a Path,
        range: PartRange,
        url: &'a str,
    ) -> BoxFuture<'a, String>;
}

/// Uploads a whole file in one request, bypassing multipart.
pub trait SingleShotUploader: Send + Sync {
    fn put_object<'a>(&'a self, source_path: &'a Path, destination_key: &'a str)
    -> BoxFuture<'a, ()>;
}
