//! Data types for the upload flow.

use std::fmt;

/// Stage of the upload state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Planning,
    Initiating,
    /// `Initiating` with an existing, plan-consistent checkpoint.
    Resuming,
    Uploading,
    Completing,
    Done,
    Failed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadState::Planning => "planning",
            UploadState::Initiating => "initiating",
            UploadState::Resuming => "resuming",
            UploadState::Uploading => "uploading",
            UploadState::Completing => "completing",
            UploadState::Done => "done",
            UploadState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The state machine entered a new stage.
    State(UploadState),
    /// A part was confirmed by the store and checkpointed.
    PartUploaded {
        part_number: u32,
        part_count: u32,
        bytes_done: u64,
        total_bytes: u64,
    },
    /// The object is assembled at its destination.
    Completed { destination: String },
    /// The run stopped; the checkpoint is left at its last good state.
    Failed {
        stage: UploadState,
        part_number: Option<u32>,
        error: String,
    },
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Transferred with one direct PUT.
    SingleShot { bytes: u64 },
    /// Assembled from parts.
    Multipart {
        upload_id: String,
        part_count: u32,
        /// Parts that were already checkpointed when this run started.
        resumed_parts: u32,
        bytes: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(UploadState::Completing.to_string(), "completing");
        assert_eq!(UploadState::Resuming.to_string(), "resuming");
    }
}
