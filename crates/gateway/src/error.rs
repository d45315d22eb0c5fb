use maap_s3_protocol::ProtocolError;
use maap_s3_upload::UploadError;

/// Errors from the gateway and identity clients.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("response has no {0} header")]
    MissingHeader(&'static str),

    #[error("not logged in; run `maap-s3 login <email> <password>` first")]
    NotLoggedIn,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Api { status, .. } => Some(*status),
            GatewayError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Converts a failure of the completion call into [`UploadError::Completion`].
    pub(crate) fn into_completion(self) -> UploadError {
        match self {
            GatewayError::Api { status, body } => UploadError::Completion {
                status: Some(status),
                body,
            },
            other => UploadError::Completion {
                status: other.status(),
                body: other.to_string(),
            },
        }
    }
}

impl From<GatewayError> for UploadError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Api { status, body } => UploadError::RemoteService {
                status: Some(status),
                body,
            },
            GatewayError::Io(e) => UploadError::InvalidInput(e.to_string()),
            other => UploadError::RemoteService {
                status: other.status(),
                body: other.to_string(),
            },
        }
    }
}
