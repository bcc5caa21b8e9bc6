//! GitHub REST client: the read/branch/commit/PR surface the publisher
//! drives.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// GitHub rejects requests without a User-Agent.
const USER_AGENT: &str = "sentry-autofix";

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("GitHub API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response that maps to nothing more specific.
    #[error("GitHub API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The ref already exists; a previous run (or a human) got there first.
    #[error("branch {0} already exists")]
    BranchExists(String),

    /// The file changed between read and commit; the blob sha sent with the
    /// commit no longer matches.
    #[error("stale content sha for {0}")]
    StaleSha(String),

    #[error("could not decode content of {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// A file read from the code host, together with the blob sha GitHub
/// requires to overwrite it safely.
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub path: String,
    /// Decoded UTF-8 file body.
    pub content: String,
    /// Blob sha at read time; passed back verbatim when committing.
    pub sha: String,
}

/// Write/read surface of the code host. Mirrors the five REST calls the
/// publishing flow makes, and nothing else.
#[async_trait]
pub trait CodeHost {
    /// Name of the repository's default branch (`main`, `master`, ...).
    async fn default_branch(&self) -> Result<String, GithubError>;

    /// Fetch `path` from the default branch.
    async fn read_file(&self, path: &str) -> Result<FileBlob, GithubError>;

    /// Create `new_branch` pointing at the current head of `base_branch`.
    async fn create_branch(&self, base_branch: &str, new_branch: &str)
        -> Result<(), GithubError>;

    /// Replace `path` on `branch` with `content`, using the blob `sha` from
    /// the earlier read.
    async fn commit_file(
        &self,
        path: &str,
        content: &str,
        sha: &str,
        branch: &str,
        message: &str,
    ) -> Result<(), GithubError>;

    /// Open a pull request from `head` into `base`; returns its web URL.
    async fn open_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String, GithubError>;
}

/// Client for the GitHub REST API, scoped to a single `owner/name`
/// repository.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    repo: String,
}

impl GithubClient {
    pub fn new(config: &crate::config::GithubConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            token: config.token.clone(),
            repo: config.repo.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{}", self.api_url, self.repo, path)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("User-Agent", USER_AGENT)
            .bearer_auth(&self.token)
    }

    /// Turn a non-2xx response into an error, preserving status and body.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GithubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GithubError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// GitHub returns blob content base64-encoded with embedded newlines; strip
/// the whitespace before decoding.
fn decode_blob(path: &str, encoded: &str) -> Result<String, GithubError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| GithubError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| GithubError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl CodeHost for GithubClient {
    #[instrument(skip(self), fields(repo = %self.repo))]
    async fn default_branch(&self) -> Result<String, GithubError> {
        #[derive(serde::Deserialize)]
        struct Repo {
            default_branch: String,
        }

        let response = self
            .request(reqwest::Method::GET, self.url(""))
            .send()
            .await?;
        let repo: Repo = Self::check(response).await?.json().await?;
        Ok(repo.default_branch)
    }

    #[instrument(skip(self))]
    async fn read_file(&self, path: &str) -> Result<FileBlob, GithubError> {
        #[derive(serde::Deserialize)]
        struct Contents {
            content: String,
            sha: String,
        }

        let response = self
            .request(reqwest::Method::GET, self.url(&format!("/contents/{path}")))
            .send()
            .await?;
        let contents: Contents = Self::check(response).await?.json().await?;
        let content = decode_blob(path, &contents.content)?;
        debug!(bytes = content.len(), sha = %contents.sha, "read file");

        Ok(FileBlob {
            path: path.to_string(),
            content,
            sha: contents.sha,
        })
    }

    #[instrument(skip(self))]
    async fn create_branch(
        &self,
        base_branch: &str,
        new_branch: &str,
    ) -> Result<(), GithubError> {
        #[derive(serde::Deserialize)]
        struct GitRef {
            object: RefObject,
        }
        #[derive(serde::Deserialize)]
        struct RefObject {
            sha: String,
        }

        let response = self
            .request(
                reqwest::Method::GET,
                self.url(&format!("/git/ref/heads/{base_branch}")),
            )
            .send()
            .await?;
        let head: GitRef = Self::check(response).await?.json().await?;
        debug!(base = %base_branch, sha = %head.object.sha, "resolved base branch head");

        let response = self
            .request(reqwest::Method::POST, self.url("/git/refs"))
            .json(&json!({
                "ref": format!("refs/heads/{new_branch}"),
                "sha": head.object.sha,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return if body.contains("already exists") {
                Err(GithubError::BranchExists(new_branch.to_string()))
            } else {
                Err(GithubError::Api {
                    status: status.as_u16(),
                    body,
                })
            };
        }
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, content, message))]
    async fn commit_file(
        &self,
        path: &str,
        content: &str,
        sha: &str,
        branch: &str,
        message: &str,
    ) -> Result<(), GithubError> {
        let response = self
            .request(reqwest::Method::PUT, self.url(&format!("/contents/{path}")))
            .json(&json!({
                "message": message,
                "content": STANDARD.encode(content.as_bytes()),
                "sha": sha,
                "branch": branch,
            }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(GithubError::StaleSha(path.to_string()));
        }
        Self::check(response).await?;
        debug!(%branch, "committed replacement file");
        Ok(())
    }

    #[instrument(skip(self, body))]
    async fn open_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String, GithubError> {
        #[derive(serde::Deserialize)]
        struct Pull {
            html_url: String,
        }

        let response = self
            .request(reqwest::Method::POST, self.url("/pulls"))
            .json(&json!({
                "title": title,
                "body": body,
                "head": head,
                "base": base,
            }))
            .send()
            .await?;
        let pull: Pull = Self::check(response).await?.json().await?;
        Ok(pull.html_url)
    }
}
