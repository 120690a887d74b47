//! GitHub pull request API

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{HostingError, HostingProvider, MergeMethod, PullRequest, status_error};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "orc-engine";

/// GitHub REST client scoped to one `owner/repo`
pub struct GitHubProvider {
    repo: String,
    token: String,
    base_url: String,
    http: Client,
}

/// Subset of the GitHub pull request payload we care about
#[derive(Debug, Deserialize)]
struct GitHubPr {
    number: u64,
    title: String,
    html_url: String,
    state: String,
    head: GitHubRef,
    base: GitHubRef,
}

#[derive(Debug, Deserialize)]
struct GitHubRef {
    #[serde(rename = "ref")]
    name: String,
}

impl From<GitHubPr> for PullRequest {
    fn from(pr: GitHubPr) -> Self {
        PullRequest {
            number: pr.number,
            title: pr.title,
            url: pr.html_url,
            head: pr.head.name,
            base: pr.base.name,
            state: pr.state,
        }
    }
}

impl GitHubProvider {
    pub fn new(repo: String, token: String, base_url: Option<String>) -> Result<Self, HostingError> {
        Ok(Self {
            repo,
            token,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: Client::new(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, HostingError> {
        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(status_error(status, message))
    }

    fn owner(&self) -> &str {
        self.repo.split('/').next().unwrap_or(&self.repo)
    }
}

#[async_trait]
impl HostingProvider for GitHubProvider {
    async fn check_auth(&self) -> Result<(), HostingError> {
        let response = self.request(reqwest::Method::GET, "/user").send().await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn create_pr(&self, title: &str, body: &str, head: &str, base: &str) -> Result<PullRequest, HostingError> {
        debug!(repo = %self.repo, head, base, "GitHubProvider::create_pr");
        let response = self
            .request(reqwest::Method::POST, &format!("/repos/{}/pulls", self.repo))
            .json(&json!({ "title": title, "body": body, "head": head, "base": base }))
            .send()
            .await?;
        let pr: GitHubPr = Self::check_status(response).await?.json().await?;
        Ok(pr.into())
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequest, HostingError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/repos/{}/pulls/{}", self.repo, number))
            .send()
            .await?;
        let pr: GitHubPr = Self::check_status(response).await?.json().await?;
        Ok(pr.into())
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), HostingError> {
        let merge_method = match method {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        };
        let response = self
            .request(reqwest::Method::PUT, &format!("/repos/{}/pulls/{}/merge", self.repo, number))
            .json(&json!({ "merge_method": merge_method }))
            .send()
            .await?;

        // 405: merge blocked by branch protection or merge-method policy
        if response.status().as_u16() == 405 {
            return Err(HostingError::AutoMergeNotSupported);
        }
        Self::check_status(response).await.map(|_| ())
    }

    async fn update_pr_branch(&self, number: u64) -> Result<(), HostingError> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/repos/{}/pulls/{}/update-branch", self.repo, number),
            )
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn delete_branch(&self, name: &str) -> Result<(), HostingError> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/repos/{}/git/refs/heads/{}", self.repo, name),
            )
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn find_pr_by_branch(&self, branch: &str) -> Result<PullRequest, HostingError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/repos/{}/pulls", self.repo))
            .query(&[("head", format!("{}:{}", self.owner(), branch)), ("state", "open".to_string())])
            .send()
            .await?;
        let prs: Vec<GitHubPr> = Self::check_status(response).await?.json().await?;
        prs.into_iter().next().map(Into::into).ok_or(HostingError::NoPrFound)
    }
}
