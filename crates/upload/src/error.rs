//! Upload error types.

/// Errors produced while uploading an object.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Bad source file, size or destination key.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The checkpoint store could not record progress.
    #[error("checkpoint store unavailable: {0}")]
    Persistence(String),

    /// Non-2xx or unreachable authentication, URL or gateway endpoint.
    #[error("remote service error{}: {body}", status_suffix(.status))]
    RemoteService { status: Option<u16>, body: String },

    /// Network failure, timeout or non-2xx on a part PUT.
    #[error("transfer of part {part_number} failed: {reason}")]
    Transfer { part_number: u32, reason: String },

    /// The checkpoint was laid out for a different file size.
    #[error(
        "stale session for {destination}: checkpoint has {stored_parts} parts \
         for {stored_size} bytes, the file now has {current_size} bytes \
         ({current_parts} parts)"
    )]
    StaleSession {
        destination: String,
        stored_parts: u32,
        stored_size: u64,
        current_parts: u32,
        current_size: u64,
    },

    /// The remote store rejected the final part manifest.
    #[error("remote store rejected completion{}: {body}", status_suffix(.status))]
    Completion { status: Option<u16>, body: String },

    #[error("cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl UploadError {
    /// Returns true if a checkpoint was kept and `resume` can continue it.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            UploadError::Persistence(_)
                | UploadError::RemoteService { .. }
                | UploadError::Transfer { .. }
                | UploadError::Completion { .. }
                | UploadError::Cancelled
        )
    }
}

impl From<maap_s3_transfer::Error> for UploadError {
    fn from(err: maap_s3_transfer::Error) -> Self {
        match err {
            maap_s3_transfer::Error::Persistence(msg) => UploadError::Persistence(msg),
            maap_s3_transfer::Error::InvalidInput(msg)
            | maap_s3_transfer::Error::InvalidKey(msg) => UploadError::InvalidInput(msg),
            maap_s3_transfer::Error::Io(e) => UploadError::InvalidInput(e.to_string()),
        }
    }
}
