//! GitHub-backed relay
//!
//! The production mailbox is the body of the first open issue the
//! repository owner created. Durable slots are deployment-environment
//! variables; callers seal anything secret before it reaches them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mailbox::{strip_newlines, Mailbox};
use crate::slots::{check_slot_name, SlotAccess, SlotStore};
use crate::{RelayError, Result};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "tether-relay";
const API_VERSION: &str = "2022-11-28";
const RELAY_ISSUE_TITLE: &str = "tether relay";

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(60))
        .build()?)
}

pub(crate) fn github_headers(builder: RequestBuilder) -> RequestBuilder {
    builder
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", USER_AGENT)
        .header("X-GitHub-Api-Version", API_VERSION)
}

/// Turn a non-success response into `RelayError::Http`.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read response body".to_string());
    Err(RelayError::Http {
        status: Some(status.as_u16()),
        message,
    })
}

/// Authenticated REST client scoped to one `owner/repo`.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base_url: String,
    owner: String,
    repo: String,
    token: SecretString,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_base_url", &self.api_base_url)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    pub fn new(owner: &str, repo: &str, token: SecretString) -> Result<Self> {
        Self::with_api_base_url(owner, repo, token, DEFAULT_API_BASE_URL)
    }

    pub fn with_api_base_url(
        owner: &str,
        repo: &str,
        token: SecretString,
        api_base_url: impl Into<String>,
    ) -> Result<Self> {
        for (field, value) in [("owner", owner), ("repo", repo)] {
            if value.trim().is_empty() {
                return Err(RelayError::InvalidInput {
                    field: field.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(Self {
            http: http_client()?,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token,
        })
    }

    /// Same repository, authenticated as someone else.
    pub fn with_token(&self, token: SecretString) -> Self {
        Self {
            token,
            ..self.clone()
        }
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_base_url, self.owner, self.repo, tail
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> RequestBuilder {
        github_headers(self.http.request(method, url)).bearer_auth(self.token.expose_secret())
    }
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    body: Option<String>,
}

/// Mailbox on the owner's first open issue.
#[derive(Debug, Clone)]
pub struct RemoteMailbox {
    client: GithubClient,
}

impl RemoteMailbox {
    pub fn new(client: GithubClient) -> Self {
        Self { client }
    }

    async fn first_issue(&self) -> Result<Option<Issue>> {
        let url = self.client.repo_url("/issues");
        let response = self
            .client
            .request(reqwest::Method::GET, url)
            .query(&[("creator", self.client.owner.as_str()), ("state", "open")])
            .send()
            .await?;
        let issues: Vec<Issue> = ensure_success(response).await?.json().await?;
        Ok(issues.into_iter().next())
    }
}

#[async_trait]
impl Mailbox for RemoteMailbox {
    async fn read(&self) -> String {
        match self.first_issue().await {
            Ok(Some(issue)) => strip_newlines(issue.body.as_deref().unwrap_or_default()),
            Ok(None) => String::new(),
            Err(e) => {
                warn!(error = %e, "issue mailbox unreachable");
                String::new()
            }
        }
    }

    async fn write(&self, text: &str) -> Result<()> {
        #[derive(Serialize)]
        struct IssueBody<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            title: Option<&'a str>,
            body: &'a str,
        }

        let (method, url, title) = match self.first_issue().await? {
            Some(issue) => (
                reqwest::Method::PATCH,
                self.client.repo_url(&format!("/issues/{}", issue.number)),
                None,
            ),
            None => (
                reqwest::Method::POST,
                self.client.repo_url("/issues"),
                Some(RELAY_ISSUE_TITLE),
            ),
        };
        let response = self
            .client
            .request(method, url)
            .json(&IssueBody { title, body: text })
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Variable {
    name: String,
    value: String,
}

/// Slots stored as variables of one deployment environment.
#[derive(Debug, Clone)]
pub struct GithubSlots {
    client: GithubClient,
    environment: String,
}

impl GithubSlots {
    pub fn new(client: GithubClient, environment: impl Into<String>) -> Self {
        Self {
            client,
            environment: environment.into(),
        }
    }

    fn variables_url(&self, name: Option<&str>) -> String {
        let tail = match name {
            Some(name) => format!("/environments/{}/variables/{name}", self.environment),
            None => format!("/environments/{}/variables", self.environment),
        };
        self.client.repo_url(&tail)
    }
}

/// The same environment's variables, written with the given token.
impl SlotAccess for GithubSlots {
    fn for_token(&self, token: &SecretString) -> Result<Arc<dyn SlotStore>> {
        Ok(Arc::new(Self {
            client: self.client.with_token(token.clone()),
            environment: self.environment.clone(),
        }))
    }
}

#[async_trait]
impl SlotStore for GithubSlots {
    async fn read(&self, name: &str) -> Result<Option<String>> {
        check_slot_name(name)?;
        let response = self
            .client
            .request(reqwest::Method::GET, self.variables_url(Some(name)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let variable: Variable = ensure_success(response).await?.json().await?;
        Ok(Some(variable.value))
    }

    async fn write(&self, name: &str, value: &str) -> Result<()> {
        check_slot_name(name)?;
        let body = Variable {
            name: name.to_string(),
            value: value.to_string(),
        };
        let response = self
            .client
            .request(reqwest::Method::PATCH, self.variables_url(Some(name)))
            .json(&body)
            .send()
            .await?;
        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response).await?;
            return Ok(());
        }
        debug!(slot = name, "creating environment variable");
        let response = self
            .client
            .request(reqwest::Method::POST, self.variables_url(None))
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<()> {
        check_slot_name(name)?;
        let response = self
            .client
            .request(reqwest::Method::DELETE, self.variables_url(Some(name)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }
}
