//! Part planning, byte-range reads and resumable upload checkpoints.
//!
//! Everything in this crate is synchronous and transport-agnostic: the
//! upload coordinator decides when to call it.

mod chunked;
mod plan;
mod session;
mod validation;

pub use chunked::{PartReader, file_size};
pub use plan::{PartRange, Planner, UploadPlan, UploadRoute};
pub use session::{FileSessionStore, MemorySessionStore, SessionStore, UploadSession, session_key};
pub use validation::validate_destination_key;

/// Default part size: 5 MiB, the smallest part S3 accepts.
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Files up to this size go through a single PUT instead of multipart.
pub const DEFAULT_SINGLE_SHOT_LIMIT: u64 = 5_000_000_000;

/// Upper bound on parts per multipart upload imposed by the object store.
pub const MAX_PART_COUNT: u64 = 10_000;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("checkpoint store unavailable: {0}")]
    Persistence(String),

    #[error("invalid destination key: {0}")]
    InvalidKey(String),
}
