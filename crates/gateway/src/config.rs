//! Endpoints and timeouts for one MAAP environment.

use std::time::Duration;

pub use maap_s3_protocol::DEFAULT_BUCKET;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PART_TIMEOUT: Duration = Duration::from_secs(60);
/// Bearer tokens are refreshed after this long.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Connection settings shared by the gateway and identity clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL of the S3 gateway, without trailing slash.
    pub gateway_url: String,
    /// Full URL of the OAuth token endpoint.
    pub token_url: String,
    pub client_id: String,
    pub bucket: String,
    /// Timeout for gateway API calls.
    pub request_timeout: Duration,
    /// Timeout for one part PUT.
    pub part_timeout: Duration,
    pub token_lifetime: Duration,
}

impl GatewayConfig {
    /// Builds the configuration for an environment tag such as `"val"` or `"ops"`.
    pub fn for_environment(env: &str, client_id: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url(env),
            token_url: token_url(env),
            client_id: client_id.into(),
            bucket: DEFAULT_BUCKET.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            part_timeout: DEFAULT_PART_TIMEOUT,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
        }
    }
}

/// Gateway base URL of an environment.
pub fn gateway_url(env: &str) -> String {
    format!("https://gravitee-gateway.{env}.esa-maap.org")
}

/// Identity token endpoint of an environment.
pub fn token_url(env: &str) -> String {
    format!("https://iam.{env}.esa-maap.org/oxauth/restv1/token")
}
