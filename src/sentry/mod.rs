//! Sentry web API client: unresolved issue listing and latest-event fetch.

pub mod context;
pub mod types;

pub use context::extract_stack_context;
pub use types::{Event, Issue, StackContext};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

/// Default API root; override via config when talking to a self-hosted
/// instance or a stub server in tests.
pub const DEFAULT_BASE_URL: &str = "https://sentry.io";

#[derive(Debug, Error)]
pub enum SentryError {
    #[error("Sentry API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response. The body is kept verbatim; Sentry puts the useful
    /// detail there.
    #[error("Sentry API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Read side of the error tracker. The orchestrator only sees this trait,
/// so tests can substitute a canned issue feed for the live API.
#[async_trait]
pub trait IssueSource {
    /// All currently unresolved issues for the configured project.
    async fn list_unresolved(&self) -> Result<Vec<Issue>, SentryError>;

    /// Full payload of the most recent event recorded for `issue_id`.
    async fn latest_event(&self, issue_id: &str) -> Result<Event, SentryError>;
}

/// Client for the Sentry web API. Authenticates every request with the
/// configured bearer token.
#[derive(Debug, Clone)]
pub struct SentryClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    org: String,
    project: String,
}

impl SentryClient {
    pub fn new(config: &crate::config::SentryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            token: config.token.clone(),
            org: config.org.clone(),
            project: config.project.clone(),
        }
    }

    fn issues_url(&self) -> String {
        format!(
            "{}/api/0/projects/{}/{}/issues/?query=is:unresolved",
            self.base_url, self.org, self.project
        )
    }

    fn event_url(&self, issue_id: &str) -> String {
        format!("{}/api/0/issues/{}/events/latest/", self.base_url, issue_id)
    }

    /// GET `url`, check the status, deserialize the JSON body.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SentryError> {
        debug!(%url, "querying Sentry API");
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SentryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl IssueSource for SentryClient {
    #[instrument(skip(self), fields(org = %self.org, project = %self.project))]
    async fn list_unresolved(&self) -> Result<Vec<Issue>, SentryError> {
        let issues: Vec<Issue> = self.get_json(&self.issues_url()).await?;
        debug!(count = issues.len(), "received unresolved issue list");
        Ok(issues)
    }

    #[instrument(skip(self))]
    async fn latest_event(&self, issue_id: &str) -> Result<Event, SentryError> {
        self.get_json(&self.event_url(issue_id)).await
    }
}
