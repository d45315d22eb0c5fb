use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Errors raised while interpreting gateway payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("expected {expected} presigned URLs, got {actual}")]
    UrlCountMismatch { expected: usize, actual: usize },

    #[error("no presigned URL for part {0}")]
    MissingPart(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One store-confirmed part of a multipart upload.
///
/// Serialised as `{"eTag": "...", "partNumber": n}`, which is both the
/// checkpoint entry and the completion manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartRecord {
    #[serde(rename = "eTag")]
    pub etag: String,
    #[serde(rename = "partNumber")]
    pub part_number: u32,
}

impl PartRecord {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            etag: etag.into(),
            part_number,
        }
    }
}

/// Response body of the identity token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// A presigned URL tagged with the part it uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedPart {
    pub part_number: u32,
    pub url: String,
}

/// Body returned by the presigned URL endpoint.
///
/// Older gateways return a bare array of URLs in the order of the
/// requested part numbers; newer ones tag each URL with its part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresignedUrlList {
    Tagged(Vec<PresignedPart>),
    Positional(Vec<String>),
}

impl PresignedUrlList {
    /// Parses a response body.
    pub fn from_body(body: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Maps each requested part number to its URL.
    ///
    /// `requested` must be the part numbers sent with the request.
    /// Positional lists are matched against them in ascending order.
    pub fn into_map(self, requested: &[u32]) -> Result<BTreeMap<u32, String>, ProtocolError> {
        let mut wanted = requested.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        match self {
            PresignedUrlList::Positional(urls) => {
                if urls.len() != wanted.len() {
                    return Err(ProtocolError::UrlCountMismatch {
                        expected: wanted.len(),
                        actual: urls.len(),
                    });
                }
                Ok(wanted.into_iter().zip(urls).collect())
            }
            PresignedUrlList::Tagged(parts) => {
                let mut by_part: BTreeMap<u32, String> = parts
                    .into_iter()
                    .map(|p| (p.part_number, p.url))
                    .collect();
                let mut out = BTreeMap::new();
                for part in wanted {
                    let url = by_part
                        .remove(&part)
                        .ok_or(ProtocolError::MissingPart(part))?;
                    out.insert(part, url);
                }
                Ok(out)
            }
        }
    }
}
