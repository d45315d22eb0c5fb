//! HTTP client for the MAAP S3 gateway.
//!
//! Implements the upload collaborators from `maap-s3-upload` over the
//! gateway's presigned-URL endpoints, plus the identity token exchange
//! and the plain object operations (delete, download, list).

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod objects;
pub mod part;

#[cfg(test)]
mod mock_server;

// Re-export primary types for convenience.
pub use auth::{AuthClient, Authenticator, CredentialStore, Credentials, TokenSource};
pub use client::GatewayClient;
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use part::HttpPartUploader;
