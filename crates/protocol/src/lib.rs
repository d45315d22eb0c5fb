//! Wire types for the MAAP S3 gateway.
//!
//! The gateway fronts an S3 bucket and hands out presigned URLs; the
//! identity endpoint exchanges user credentials for a bearer token.
//! Nothing in here performs I/O.

pub mod constants;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{DEFAULT_BUCKET, Endpoint};
pub use types::{PartRecord, PresignedPart, PresignedUrlList, ProtocolError, TokenResponse};
