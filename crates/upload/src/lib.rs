//! Resumable multipart upload engine.
//!
//! This crate implements the **state machine** that moves a local file
//! into the object store. It has no HTTP dependency: the caller supplies
//! implementations of [`PresignedUrlProvider`], [`PartUploader`] and
//! [`SingleShotUploader`], and a [`SessionStore`] for checkpoints.
//!
//! # Pipeline
//!
//! 1. **Plan**: pick single-shot or multipart and lay out parts
//! 2. **Initiate / Resume**: start a remote session or reuse a checkpoint
//! 3. **Upload**: send outstanding parts in order, checkpointing each
//! 4. **Complete**: submit the sorted part manifest, then drop the checkpoint
//!
//! [`SessionStore`]: maap_s3_transfer::SessionStore

pub mod coordinator;
pub mod error;
pub mod provider;
pub mod types;

// Re-export primary types for convenience.
pub use coordinator::{DEFAULT_URL_BATCH_SIZE, UploadCoordinator};
pub use error::UploadError;
pub use provider::{BoxFuture, PartUploader, PresignedUrlProvider, SingleShotUploader};
pub use types::{UploadEvent, UploadOutcome, UploadState};
