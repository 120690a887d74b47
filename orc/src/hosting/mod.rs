//! Git hosting providers
//!
//! Unified pull/merge-request interface over GitHub and GitLab. The engine
//! only needs enough of each API to open a PR when a task completes and to
//! let operators drive merges; tokens resolve from per-provider environment
//! variables, overridable in project config.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod github;
mod gitlab;

pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;

use crate::config::HostingConfig;

/// Errors from hosting operations
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("No pull request found")]
    NoPrFound,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Auto-merge not supported by this provider")]
    AutoMergeNotSupported,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Merge strategy for a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

/// Provider-neutral pull request descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub head: String,
    pub base: String,
    pub state: String,
}

/// Unified hosting interface
#[async_trait]
pub trait HostingProvider: Send + Sync {
    /// Verify the token works
    async fn check_auth(&self) -> Result<(), HostingError>;

    async fn create_pr(&self, title: &str, body: &str, head: &str, base: &str) -> Result<PullRequest, HostingError>;

    async fn get_pr(&self, number: u64) -> Result<PullRequest, HostingError>;

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), HostingError>;

    /// Bring the PR branch up to date with its base
    async fn update_pr_branch(&self, number: u64) -> Result<(), HostingError>;

    async fn delete_branch(&self, name: &str) -> Result<(), HostingError>;

    /// Find the open PR whose head is `branch`; `NoPrFound` when none.
    async fn find_pr_by_branch(&self, branch: &str) -> Result<PullRequest, HostingError>;
}

/// Resolve the provider token: explicit env var from config, else the
/// provider's conventional variable.
fn resolve_token(configured_env: Option<&str>, default_env: &str) -> Result<String, HostingError> {
    let var = configured_env.unwrap_or(default_env);
    std::env::var(var).map_err(|_| HostingError::AuthFailed(format!("Environment variable {} not set", var)))
}

/// Build the provider named in config; `None` when hosting is disabled.
pub fn create_provider(config: &HostingConfig) -> Result<Option<Arc<dyn HostingProvider>>, HostingError> {
    match config.provider.as_str() {
        "none" | "" => Ok(None),
        "github" => {
            let token = resolve_token(config.token_env.as_deref(), "GITHUB_TOKEN")?;
            Ok(Some(Arc::new(GitHubProvider::new(
                config.repo.clone(),
                token,
                config.base_url.clone(),
            )?)))
        }
        "gitlab" => {
            let token = resolve_token(config.token_env.as_deref(), "GITLAB_TOKEN")?;
            Ok(Some(Arc::new(GitLabProvider::new(
                config.repo.clone(),
                token,
                config.base_url.clone(),
            )?)))
        }
        other => Err(HostingError::NotFound(format!("unknown hosting provider '{}'", other))),
    }
}

/// Map an HTTP error status to a hosting error kind
pub(crate) fn status_error(status: u16, message: String) -> HostingError {
    match status {
        401 | 403 => HostingError::AuthFailed(message),
        404 => HostingError::NotFound(message),
        _ => HostingError::Api { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(status_error(401, "x".into()), HostingError::AuthFailed(_)));
        assert!(matches!(status_error(403, "x".into()), HostingError::AuthFailed(_)));
        assert!(matches!(status_error(404, "x".into()), HostingError::NotFound(_)));
        assert!(matches!(status_error(500, "x".into()), HostingError::Api { status: 500, .. }));
    }

    #[test]
    fn test_merge_method_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MergeMethod::Squash).unwrap(), "\"squash\"");
    }

    #[test]
    #[serial_test::serial]
    fn test_resolve_token_prefers_configured_env() {
        // SAFETY: test-scoped env mutation, serialized
        unsafe {
            std::env::set_var("ORC_TEST_TOKEN", "tok-123");
            std::env::remove_var("ORC_TEST_MISSING");
        }

        assert_eq!(resolve_token(Some("ORC_TEST_TOKEN"), "GITHUB_TOKEN").unwrap(), "tok-123");
        assert!(resolve_token(Some("ORC_TEST_MISSING"), "GITHUB_TOKEN").is_err());

        unsafe {
            std::env::remove_var("ORC_TEST_TOKEN");
        }
    }
}
