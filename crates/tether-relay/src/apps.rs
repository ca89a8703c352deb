//! GitHub App collaborators
//!
//! SETUP turns a one-time manifest code into app credentials, waits for
//! the owner to install the app, then mints an installation token.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::github::{ensure_success, github_headers, http_client, DEFAULT_API_BASE_URL};
use crate::{RelayError, Result};

/// Credentials returned by the manifest conversion.
#[derive(Clone)]
pub struct AppCredentials {
    pub id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// RS256 private key, PEM encoded.
    pub pem: SecretString,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// An installation of the app on the owner's account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstallationRef {
    pub id: i64,
    #[serde(default)]
    pub permissions: BTreeMap<String, String>,
}

/// An installation together with a freshly minted access token.
#[derive(Debug, Clone)]
pub struct Installed {
    pub id: i64,
    pub token: SecretString,
    pub permissions: BTreeMap<String, String>,
}

#[async_trait]
pub trait AppFactory: Send + Sync {
    /// Exchange a one-time manifest code for app credentials.
    async fn exchange_code(&self, code: &str) -> Result<AppCredentials>;
}

#[async_trait]
pub trait InstallationProvider: Send + Sync {
    /// `Ok(None)` while the app is not installed yet.
    async fn find_installation(
        &self,
        app: &AppCredentials,
        owner: &str,
    ) -> Result<Option<InstallationRef>>;

    async fn mint_token(
        &self,
        app: &AppCredentials,
        installation: &InstallationRef,
    ) -> Result<Installed>;
}

/// Both collaborators against the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubApps {
    http: reqwest::Client,
    api_base_url: String,
}

impl GithubApps {
    pub fn new() -> Result<Self> {
        Self::with_api_base_url(DEFAULT_API_BASE_URL)
    }

    pub fn with_api_base_url(api_base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// App JWT valid for ten minutes, backdated a minute for clock drift.
pub fn app_jwt(app: &AppCredentials, now: u64) -> Result<String> {
    #[derive(Debug, Serialize)]
    struct Claims {
        iat: u64,
        exp: u64,
        iss: String,
    }

    if app.id.trim().is_empty() {
        return Err(RelayError::InvalidInput {
            field: "app id".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    let claims = Claims {
        iat: now.saturating_sub(60),
        exp: now + 600,
        iss: app.id.clone(),
    };
    let key = EncodingKey::from_rsa_pem(app.pem.expose_secret().as_bytes())
        .map_err(|e| RelayError::Jwt(e.to_string()))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| RelayError::Jwt(e.to_string()))
}

fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| RelayError::Jwt(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct Conversion {
    id: i64,
    client_id: String,
    client_secret: String,
    pem: String,
}

impl From<Conversion> for AppCredentials {
    fn from(c: Conversion) -> Self {
        AppCredentials {
            id: c.id.to_string(),
            client_id: c.client_id,
            client_secret: SecretString::new(c.client_secret),
            pem: SecretString::new(c.pem),
        }
    }
}

#[async_trait]
impl AppFactory for GithubApps {
    async fn exchange_code(&self, code: &str) -> Result<AppCredentials> {
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(RelayError::InvalidInput {
                field: "manifest code".to_string(),
                reason: "unexpected characters".to_string(),
            });
        }
        let url = format!("{}/app-manifests/{code}/conversions", self.api_base_url);
        let response = github_headers(self.http.post(url)).send().await?;
        let conversion: Conversion = ensure_success(response).await?.json().await?;
        info!(app_id = conversion.id, "converted app manifest");
        Ok(conversion.into())
    }
}

#[async_trait]
impl InstallationProvider for GithubApps {
    async fn find_installation(
        &self,
        app: &AppCredentials,
        owner: &str,
    ) -> Result<Option<InstallationRef>> {
        let jwt = app_jwt(app, unix_now()?)?;
        let url = format!("{}/users/{owner}/installation", self.api_base_url);
        let response = github_headers(self.http.get(url))
            .bearer_auth(jwt)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(owner, "app not installed yet");
            return Ok(None);
        }
        Ok(Some(ensure_success(response).await?.json().await?))
    }

    async fn mint_token(
        &self,
        app: &AppCredentials,
        installation: &InstallationRef,
    ) -> Result<Installed> {
        #[derive(Debug, Deserialize)]
        struct AccessToken {
            token: String,
        }

        let jwt = app_jwt(app, unix_now()?)?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base_url, installation.id
        );
        let response = github_headers(self.http.post(url))
            .bearer_auth(jwt)
            .send()
            .await?;
        let access: AccessToken = ensure_success(response).await?.json().await?;
        Ok(Installed {
            id: installation.id,
            token: SecretString::new(access.token),
            permissions: installation.permissions.clone(),
        })
    }
}
