//! CLI configuration.
//!
//! Configuration is read from TOML, then overridden by environment:
//! - Linux: `$XDG_CONFIG_HOME/maap-s3/config.toml` (or `~/.config/...`)
//! - Windows: `%APPDATA%/maap-s3/config.toml`
//!
//! | Variable | Field |
//! |---|---|
//! | `MAAP_ENV_TYPE` | `env_type` |
//! | `CLIENT_ID` | `client_id` |
//! | `MAAP_S3_BUCKET` | `bucket` |
//! | `MAAP_S3_STATE_DIR` | `state_dir` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use maap_s3_gateway::GatewayConfig;
use maap_s3_gateway::config::{gateway_url, token_url};
use maap_s3_transfer::Planner;
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "maap-s3";
const MIB: u64 = 1024 * 1024;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Environment tag, e.g. `val` or `ops`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_type: Option<String>,

    /// OAuth client id registered with the identity service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_part_size_mib")]
    pub part_size_mib: u64,

    /// Files up to this many bytes are uploaded in one PUT.
    #[serde(default = "default_single_shot_limit")]
    pub single_shot_limit: u64,

    #[serde(default = "default_part_timeout_secs")]
    pub part_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Presigned URLs requested per gateway call.
    #[serde(default = "default_url_batch_size")]
    pub url_batch_size: usize,

    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,

    /// Where credentials and upload checkpoints are kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Overrides the gateway URL derived from `env_type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,

    /// Overrides the token URL derived from `env_type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

fn default_bucket() -> String {
    maap_s3_gateway::config::DEFAULT_BUCKET.into()
}

fn default_part_size_mib() -> u64 {
    5
}

fn default_single_shot_limit() -> u64 {
    maap_s3_transfer::DEFAULT_SINGLE_SHOT_LIMIT
}

fn default_part_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_url_batch_size() -> usize {
    maap_s3_upload::coordinator::DEFAULT_URL_BATCH_SIZE
}

fn default_token_lifetime_secs() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_type: None,
            client_id: None,
            bucket: default_bucket(),
            part_size_mib: default_part_size_mib(),
            single_shot_limit: default_single_shot_limit(),
            part_timeout_secs: default_part_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            url_batch_size: default_url_batch_size(),
            token_lifetime_secs: default_token_lifetime_secs(),
            state_dir: None,
            gateway_url: None,
            token_url: None,
        }
    }
}

impl Config {
    /// Loads the configuration file (if any) and applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();
        let mut config = match &path {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads `path`, or returns defaults if it does not exist.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "configuration loaded");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable configuration");
                Ok(Self::default())
            }
        }
    }

    /// Overrides fields from environment variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("MAAP_ENV_TYPE") {
            self.env_type = Some(v.trim().to_string());
        }
        if let Some(v) = non_empty("CLIENT_ID") {
            self.client_id = Some(v.trim().to_string());
        }
        if let Some(v) = non_empty("MAAP_S3_BUCKET") {
            self.bucket = v.trim().to_string();
        }
        if let Some(v) = non_empty("MAAP_S3_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(v));
        }
    }

    /// Builds the gateway settings. Fails if the environment or client id is missing.
    pub fn gateway(&self) -> anyhow::Result<GatewayConfig> {
        let Some(client_id) = self.client_id.clone() else {
            bail!("CLIENT_ID is not set (export it or set client_id in the config file)");
        };

        let env = self.env_type.as_deref();
        let gateway = match (&self.gateway_url, env) {
            (Some(url), _) => url.clone(),
            (None, Some(env)) => gateway_url(env),
            (None, None) => bail!(
                "MAAP_ENV_TYPE is not set (export it or set env_type in the config file)"
            ),
        };
        let token = match (&self.token_url, env) {
            (Some(url), _) => url.clone(),
            (None, Some(env)) => token_url(env),
            (None, None) => bail!(
                "MAAP_ENV_TYPE is not set (export it or set env_type in the config file)"
            ),
        };

        Ok(GatewayConfig {
            gateway_url: gateway,
            token_url: token,
            client_id,
            bucket: self.bucket.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            part_timeout: Duration::from_secs(self.part_timeout_secs),
            token_lifetime: Duration::from_secs(self.token_lifetime_secs),
        })
    }

    pub fn planner(&self) -> Planner {
        Planner::new(self.part_size_mib.saturating_mul(MIB), self.single_shot_limit)
    }

    pub fn state_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => config_dir()
                .map(|d| d.join(APP_DIR))
                .context("cannot determine a state directory; set MAAP_S3_STATE_DIR"),
        }
    }

    pub fn credentials_path(&self) -> anyhow::Result<PathBuf> {
        Ok(self.state_dir()?.join("userinfo.json"))
    }

    pub fn sessions_dir(&self) -> anyhow::Result<PathBuf> {
        Ok(self.state_dir()?.join("sessions"))
    }
}

/// Returns the configuration file path.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
