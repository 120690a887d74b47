//! GitLab merge request API
//!
//! Same unified surface as the GitHub provider. GitLab has no rebase-merge
//! via the accept endpoint, so `MergeMethod::Rebase` reports
//! `AutoMergeNotSupported` and the caller decides how to degrade.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{HostingError, HostingProvider, MergeMethod, PullRequest, status_error};

const DEFAULT_BASE_URL: &str = "https://gitlab.com/api/v4";

/// GitLab REST client scoped to one project path (`group/project`)
pub struct GitLabProvider {
    project: String,
    token: String,
    base_url: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct GitLabMr {
    iid: u64,
    title: String,
    web_url: String,
    state: String,
    source_branch: String,
    target_branch: String,
}

impl From<GitLabMr> for PullRequest {
    fn from(mr: GitLabMr) -> Self {
        PullRequest {
            number: mr.iid,
            title: mr.title,
            url: mr.web_url,
            head: mr.source_branch,
            base: mr.target_branch,
            state: mr.state,
        }
    }
}

impl GitLabProvider {
    pub fn new(project: String, token: String, base_url: Option<String>) -> Result<Self, HostingError> {
        Ok(Self {
            project,
            token,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: Client::new(),
        })
    }

    fn project_path(&self) -> String {
        // Project paths are URL-encoded in the GitLab API
        self.project.replace('/', "%2F")
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("PRIVATE-TOKEN", self.token.clone())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, HostingError> {
        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(status_error(status, message))
    }
}

#[async_trait]
impl HostingProvider for GitLabProvider {
    async fn check_auth(&self) -> Result<(), HostingError> {
        let response = self.request(reqwest::Method::GET, "/user").send().await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn create_pr(&self, title: &str, body: &str, head: &str, base: &str) -> Result<PullRequest, HostingError> {
        debug!(project = %self.project, head, base, "GitLabProvider::create_pr");
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/projects/{}/merge_requests", self.project_path()),
            )
            .json(&json!({
                "title": title,
                "description": body,
                "source_branch": head,
                "target_branch": base,
            }))
            .send()
            .await?;
        let mr: GitLabMr = Self::check_status(response).await?.json().await?;
        Ok(mr.into())
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequest, HostingError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/projects/{}/merge_requests/{}", self.project_path(), number),
            )
            .send()
            .await?;
        let mr: GitLabMr = Self::check_status(response).await?.json().await?;
        Ok(mr.into())
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), HostingError> {
        let squash = match method {
            MergeMethod::Merge => false,
            MergeMethod::Squash => true,
            MergeMethod::Rebase => return Err(HostingError::AutoMergeNotSupported),
        };
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/projects/{}/merge_requests/{}/merge", self.project_path(), number),
            )
            .json(&json!({ "squash": squash }))
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn update_pr_branch(&self, number: u64) -> Result<(), HostingError> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/projects/{}/merge_requests/{}/rebase", self.project_path(), number),
            )
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn delete_branch(&self, name: &str) -> Result<(), HostingError> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!(
                    "/projects/{}/repository/branches/{}",
                    self.project_path(),
                    name.replace('/', "%2F")
                ),
            )
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn find_pr_by_branch(&self, branch: &str) -> Result<PullRequest, HostingError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/projects/{}/merge_requests", self.project_path()),
            )
            .query(&[("source_branch", branch), ("state", "opened")])
            .send()
            .await?;
        let mrs: Vec<GitLabMr> = Self::check_status(response).await?.json().await?;
        mrs.into_iter().next().map(Into::into).ok_or(HostingError::NoPrFound)
    }
}
