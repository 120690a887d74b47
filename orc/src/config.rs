//! Engine configuration types and loading

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::worktree::default_protected_branches;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Git hosting (pull request) configuration
    pub hosting: HostingConfig,

    /// Concurrency limits
    pub concurrency: ConcurrencyConfig,

    /// Git and branch policy
    pub git: GitConfig,

    /// Phase execution tuning
    pub execution: ExecutionConfig,
}

impl Config {
    /// Load configuration with fallback chain: explicit path, then
    /// `.orc/orc.yml` in the project, then the user config dir, then
    /// defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".orc/orc.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("orc").join("orc.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Per-request deadline in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

/// Git hosting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostingConfig {
    /// "github", "gitlab", or "none"
    pub provider: String,

    /// Repository slug (`owner/repo` or `group/project`)
    pub repo: String,

    /// Override for the token environment variable
    #[serde(rename = "token-env")]
    pub token_env: Option<String>,

    /// Override for the API base URL (self-hosted instances)
    #[serde(rename = "base-url")]
    pub base_url: Option<String>,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            repo: String::new(),
            token_env: None,
            base_url: None,
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum tasks running at once; excess submissions queue FIFO
    #[serde(rename = "max-tasks")]
    pub max_tasks: usize,

    /// Hard deadline in seconds for a cancel to reach a terminal state
    #[serde(rename = "cancel-grace-secs")]
    pub cancel_grace_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_tasks: 3,
            cancel_grace_secs: 30,
        }
    }
}

/// Git and branch policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Branch names (or `prefix/*` patterns) the engine refuses to push to
    #[serde(rename = "protected-branches")]
    pub protected_branches: Vec<String>,

    /// Default branch new tasks target
    #[serde(rename = "target-branch")]
    pub target_branch: String,

    /// Author string for phase commits (`Name <email>`)
    #[serde(rename = "commit-author")]
    pub commit_author: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            protected_branches: default_protected_branches(),
            target_branch: "main".to_string(),
            commit_author: None,
        }
    }
}

/// Phase execution tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Default per-phase iteration bound
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Soft per-phase timeout in minutes
    #[serde(rename = "phase-timeout-mins")]
    pub phase_timeout_mins: u64,

    /// Phase retries the runner may spend on retryable failures
    #[serde(rename = "retry-budget")]
    pub retry_budget: u32,

    /// Transcript truncation bound for tool content (bytes)
    #[serde(rename = "chunk-limit")]
    pub chunk_limit: usize,

    /// Directory of `.hbs` prompt template overrides
    #[serde(rename = "prompt-dir")]
    pub prompt_dir: Option<PathBuf>,

    /// Hook command per phase id, run read-only before the phase dialogue
    #[serde(rename = "phase-hooks")]
    pub phase_hooks: HashMap<String, String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            phase_timeout_mins: 30,
            retry_budget: 2,
            chunk_limit: 4000,
            prompt_dir: None,
            phase_hooks: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.concurrency.max_tasks, 3);
        assert_eq!(config.concurrency.cancel_grace_secs, 30);
        assert_eq!(config.execution.max_iterations, 20);
        assert_eq!(config.git.target_branch, "main");
        assert!(config.git.protected_branches.contains(&"main".to_string()));
        assert_eq!(config.hosting.provider, "none");
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  provider: anthropic
  model: claude-opus-4
  api-key-env: MY_API_KEY
  max-tokens: 8192

hosting:
  provider: github
  repo: octo/widgets
  token-env: MY_GH_TOKEN

concurrency:
  max-tasks: 5

git:
  protected-branches: [main, release/*]
  target-branch: develop

execution:
  max-iterations: 10
  retry-budget: 1
  phase-hooks:
    tdd_write: "scripts/check-tests.sh"
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.model, "claude-opus-4");
        assert_eq!(config.llm.api_key_env, "MY_API_KEY");
        assert_eq!(config.hosting.provider, "github");
        assert_eq!(config.hosting.repo, "octo/widgets");
        assert_eq!(config.concurrency.max_tasks, 5);
        assert_eq!(config.git.target_branch, "develop");
        assert_eq!(config.execution.max_iterations, 10);
        assert_eq!(config.execution.phase_hooks["tdd_write"], "scripts/check-tests.sh");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
llm:
  model: claude-haiku
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.model, "claude-haiku");
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.concurrency.max_tasks, 3);
    }
}
