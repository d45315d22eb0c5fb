/// Bucket the gateway writes catalogue data into.
pub const DEFAULT_BUCKET: &str = "bmap-catalogue-data";

/// OAuth grant type used by the identity endpoint.
pub const GRANT_TYPE_PASSWORD: &str = "password";

/// OAuth scope requested with every token exchange.
pub const TOKEN_SCOPE: &str = "openid+profile";

/// Header carrying the store-issued part checksum token.
pub const ETAG_HEADER: &str = "ETag";

/// Query parameter names shared by the multipart endpoints.
pub mod params {
    pub const BUCKET_NAME: &str = "bucketName";
    pub const OBJECT_KEY: &str = "objectKey";
    pub const UPLOAD_ID: &str = "uploadId";
    pub const NB_PARTS: &str = "nbParts";
    pub const PART_NUMBERS: &str = "partNumbers";
    pub const LIST: &str = "list";
}

/// Gateway endpoints under the `/s3` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Starts a multipart upload and returns its upload id as plain text.
    GenerateUploadId,
    /// Returns presigned PUT URLs for a set of part numbers.
    GeneratePresignedUrls,
    /// Assembles the uploaded parts into the final object.
    CompleteMultipartUpload,
    /// Releases a multipart upload and its stored parts.
    AbortMultipartUpload,
}

impl Endpoint {
    /// Path of this endpoint relative to the gateway base URL.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::GenerateUploadId => "/s3/generateUploadId",
            Endpoint::GeneratePresignedUrls => "/s3/generateListPresignedUrls",
            Endpoint::CompleteMultipartUpload => "/s3/completeMultiPartUploadRequest",
            Endpoint::AbortMultipartUpload => "/s3/abortMultiPartUploadRequest",
        }
    }
}

/// Path of an object under the gateway's `/s3` prefix.
///
/// Leading slashes on `key` are ignored.
pub fn object_path(key: &str) -> String {
    format!("/s3/{}", key.trim_start_matches('/'))
}
