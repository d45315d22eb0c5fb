//! Identity token exchange and credential persistence.
//!
//! The identity service issues bearer tokens for an email/password pair
//! (OAuth password grant). Credentials are kept in a JSON file so that
//! expired tokens can be renewed without prompting.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use maap_s3_protocol::TokenResponse;
use maap_s3_protocol::constants::{GRANT_TYPE_PASSWORD, TOKEN_SCOPE};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Boxed future returned by [`TokenSource`] methods.
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String, GatewayError>> + Send + 'a>>;

/// Supplies bearer tokens for gateway calls.
pub trait TokenSource: Send + Sync {
    /// Returns a token believed to be valid.
    fn bearer(&self) -> TokenFuture<'_>;

    /// Obtains a new token, bypassing any cache.
    fn refresh(&self) -> TokenFuture<'_>;
}

/// Client for the identity token endpoint.
pub struct AuthClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
}

impl AuthClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
        })
    }

    /// Exchanges an email and password for an access token.
    pub async fn exchange(&self, email: &str, password: &str) -> Result<String, GatewayError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("username", email),
            ("password", password),
            ("grant_type", GRANT_TYPE_PASSWORD),
            ("scope", TOKEN_SCOPE),
        ];
        let resp = self.http.post(&self.token_url).form(&form).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        let token: TokenResponse = serde_json::from_str(&body)?;
        if token.access_token.is_empty() {
            return Err(GatewayError::Auth(
                "identity service returned no access token".into(),
            ));
        }

        debug!(user = %email, "access token issued");
        Ok(token.access_token)
    }
}

/// Stored login and the last token issued for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Returns true if the token was issued less than `lifetime` ago.
    pub fn token_is_fresh(&self, lifetime: Duration, now: DateTime<Utc>) -> bool {
        let Some(issued_at) = self.issued_at else {
            return false;
        };
        if self.token.is_empty() {
            return false;
        }
        match chrono::Duration::from_std(lifetime) {
            Ok(lifetime) => now < issued_at + lifetime,
            Err(_) => true,
        }
    }
}

/// JSON file holding the user's [`Credentials`].
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads stored credentials, or `None` if nobody has logged in.
    pub fn load(&self) -> Result<Option<Credentials>, GatewayError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let creds: Credentials = serde_json::from_str(&data)?;
        Ok(Some(creds))
    }

    /// Writes credentials, readable by the owner only.
    pub fn save(&self, creds: &Credentials) -> Result<(), GatewayError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(creds)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;

        // `mode` only applies on creation; tighten a file left by an older run.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        debug!(path = %self.path.display(), "credentials saved");
        Ok(())
    }
}

/// [`TokenSource`] backed by stored credentials.
///
/// Tokens older than the configured lifetime are renewed by replaying
/// the stored email and password.
pub struct Authenticator {
    client: AuthClient,
    store: CredentialStore,
    lifetime: Duration,
    cached: Mutex<Option<Credentials>>,
}

impl Authenticator {
    pub fn new(client: AuthClient, store: CredentialStore, lifetime: Duration) -> Self {
        Self {
            client,
            store,
            lifetime,
            cached: Mutex::new(None),
        }
    }

    /// Exchanges and stores new credentials. Returns the issued token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, GatewayError> {
        let token = self.client.exchange(email, password).await?;
        let creds = Credentials {
            email: email.to_string(),
            password: password.to_string(),
            token: token.clone(),
            issued_at: Some(Utc::now()),
        };
        self.store.save(&creds)?;
        *self.cached.lock().await = Some(creds);
        info!(user = %email, "logged in");
        Ok(token)
    }

    async fn token(&self, force: bool) -> Result<String, GatewayError> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = self.store.load()?;
        }
        let Some(creds) = cached.as_mut() else {
            return Err(GatewayError::NotLoggedIn);
        };

        if !force && creds.token_is_fresh(self.lifetime, Utc::now()) {
            return Ok(creds.token.clone());
        }

        debug!(user = %creds.email, forced = force, "renewing access token");
        creds.token = self.client.exchange(&creds.email, &creds.password).await?;
        creds.issued_at = Some(Utc::now());
        self.store.save(creds)?;
        Ok(creds.token.clone())
    }
}

impl TokenSource for Authenticator {
    fn bearer(&self) -> TokenFuture<'_> {
        Box::pin(self.token(false))
    }

    fn refresh(&self) -> TokenFuture<'_> {
        Box::pin(self.token(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_server::{self, MockResponse};

    fn test_config(token_url: &str) -> GatewayConfig {
        GatewayConfig {
            token_url: token_url.to_string(),
            ..GatewayConfig::for_environment("test", "maap-cli")
        }
    }

    fn stored(dir: &Path, token: &str, issued_at: Option<DateTime<Utc>>) -> CredentialStore {
        let store = CredentialStore::new(dir.join("userinfo.json"));
        store
            .save(&Credentials {
                email: "user@example.com".into(),
                password: "secret".into(),
                token: token.into(),
                issued_at,
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn exchange_posts_password_grant() {
        let server =
            mock_server::start(vec![MockResponse::ok(r#"{"access_token":"tok-1"}"#)]).await;
        let client = AuthClient::new(&test_config(&server.url)).unwrap();

        let token = client.exchange("user@example.com", "secret").await.unwrap();
        assert_eq!(token, "tok-1");

        let req = &server.requests()[0];
        assert_eq!(req.method, "POST");
        let body = req.body_text();
        assert!(body.contains("client_id=maap-cli"), "{body}");
        assert!(body.contains("username=user%40example.com"), "{body}");
        assert!(body.contains("password=secret"), "{body}");
        assert!(body.contains("grant_type=password"), "{body}");
        assert!(body.contains("scope=openid%2Bprofile"), "{body}");
    }

    #[tokio::test]
    async fn exchange_rejected_credentials() {
        let server = mock_server::start(vec![MockResponse::status(
            401,
            r#"{"error":"invalid_grant"}"#,
        )])
        .await;
        let client = AuthClient::new(&test_config(&server.url)).unwrap();

        let err = client.exchange("user@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, GatewayError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn exchange_without_token_is_auth_error() {
        let server = mock_server::start(vec![MockResponse::ok(r#"{"token_type":"bearer"}"#)]).await;
        let client = AuthClient::new(&test_config(&server.url)).unwrap();

        let err = client.exchange("user@example.com", "secret").await.unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[test]
    fn credential_store_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(tmp.path().join("nested").join("userinfo.json"));
        assert!(store.load().unwrap().is_none());

        let creds = Credentials {
            email: "user@example.com".into(),
            password: "secret".into(),
            token: "tok".into(),
            issued_at: Some(Utc::now()),
        };
        store.save(&creds).unwrap();
        assert_eq!(store.load().unwrap(), Some(creds));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"issuedAt\""));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn save_tightens_existing_credentials_file() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("userinfo.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = CredentialStore::new(&path);
        store
            .save(&Credentials {
                email: "user@example.com".into(),
                password: "secret".into(),
                token: String::new(),
                issued_at: None,
            })
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load().unwrap().unwrap().password, "secret");
    }

    #[test]
    fn legacy_userinfo_without_timestamp_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("userinfo.json");
        std::fs::write(
            &path,
            r#"{"email":"user@example.com","password":"secret","token":"old"}"#,
        )
        .unwrap();

        let creds = CredentialStore::new(path).load().unwrap().unwrap();
        assert_eq!(creds.token, "old");
        assert!(!creds.token_is_fresh(Duration::from_secs(3600), Utc::now()));
    }

    #[test]
    fn token_freshness_window() {
        let now = Utc::now();
        let creds = Credentials {
            token: "tok".into(),
            issued_at: Some(now - chrono::Duration::minutes(59)),
            ..Default::default()
        };
        assert!(creds.token_is_fresh(Duration::from_secs(3600), now));
        assert!(!creds.token_is_fresh(Duration::from_secs(60), now));
    }

    #[tokio::test]
    async fn bearer_without_login_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(
            AuthClient::new(&test_config("http://127.0.0.1:9")).unwrap(),
            CredentialStore::new(tmp.path().join("userinfo.json")),
            Duration::from_secs(3600),
        );
        assert!(matches!(
            auth.bearer().await,
            Err(GatewayError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn fresh_token_is_reused_without_exchange() {
        let tmp = tempfile::tempdir().unwrap();
        let store = stored(tmp.path(), "cached", Some(Utc::now()));
        // Any exchange would hit a closed port and fail.
        let auth = Authenticator::new(
            AuthClient::new(&test_config("http://127.0.0.1:9")).unwrap(),
            store,
            Duration::from_secs(3600),
        );
        assert_eq!(auth.bearer().await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn expired_token_is_renewed_and_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let old = Utc::now() - chrono::Duration::hours(2);
        let store = stored(tmp.path(), "stale", Some(old));
        let server =
            mock_server::start(vec![MockResponse::ok(r#"{"access_token":"renewed"}"#)]).await;
        let auth = Authenticator::new(
            AuthClient::new(&test_config(&server.url)).unwrap(),
            store,
            Duration::from_secs(3600),
        );

        assert_eq!(auth.bearer().await.unwrap(), "renewed");
        // Second call uses the cache.
        assert_eq!(auth.bearer().await.unwrap(), "renewed");
        assert_eq!(server.requests().len(), 1);

        let saved = CredentialStore::new(tmp.path().join("userinfo.json"))
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(saved.token, "renewed");
        assert!(saved.issued_at.unwrap() > old);
    }

    #[tokio::test]
    async fn refresh_always_exchanges() {
        let tmp = tempfile::tempdir().unwrap();
        let store = stored(tmp.path(), "cached", Some(Utc::now()));
        let server =
            mock_server::start(vec![MockResponse::ok(r#"{"access_token":"forced"}"#)]).await;
        let auth = Authenticator::new(
            AuthClient::new(&test_config(&server.url)).unwrap(),
            store,
            Duration::from_secs(3600),
        );

        assert_eq!(auth.refresh().await.unwrap(), "forced");
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn login_stores_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let server =
            mock_server::start(vec![MockResponse::ok(r#"{"access_token":"first"}"#)]).await;
        let auth = Authenticator::new(
            AuthClient::new(&test_config(&server.url)).unwrap(),
            CredentialStore::new(tmp.path().join("userinfo.json")),
            Duration::from_secs(3600),
        );

        assert_eq!(auth.login("user@example.com", "secret").await.unwrap(), "first");
        assert_eq!(auth.bearer().await.unwrap(), "first");

        let saved = CredentialStore::new(tmp.path().join("userinfo.json"))
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(saved.email, "user@example.com");
        assert_eq!(saved.password, "secret");
    }
}
