//! Worktree manager
//!
//! One isolated checkout per running task under `.orc/worktrees/<task-id>`,
//! on a dedicated `orc/<task-id>` branch. Tasks never execute in the
//! primary working directory. Pushes to protected branches are refused in
//! code and by an installed pre-push hook.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::TaskId;

/// Error types for worktree operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("Failed to remove worktree: {0}")]
    RemoveFailed(String),

    #[error("Worktree not found: {0}")]
    NotFound(String),

    #[error("Worktree corrupted: {0}")]
    Corrupted(String),

    #[error("Refusing to push to protected branch: {0}")]
    ProtectedBranch(String),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Push failed: {0}")]
    PushFailed(String),

    #[error("Git command failed: {0}")]
    GitError(String),
}

/// Release policy for a finished worktree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Close the handle, keep directory and branch (forensics, resume)
    Keep,
    /// Remove the directory and delete the local branch
    Prune,
}

/// Configuration for the worktree manager
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    /// Path to the primary repository
    pub repo_root: PathBuf,

    /// Base directory for worktrees (`.orc/worktrees`)
    pub base_dir: PathBuf,

    /// Branch prefix for task branches
    pub branch_prefix: String,

    /// Branch names (or `prefix/*` patterns) the engine refuses to push to
    pub protected_branches: Vec<String>,
}

impl WorktreeConfig {
    pub fn new(repo_root: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            base_dir: base_dir.into(),
            branch_prefix: "orc".to_string(),
            protected_branches: default_protected_branches(),
        }
    }
}

/// The default protected set
pub fn default_protected_branches() -> Vec<String> {
    vec![
        "main".to_string(),
        "master".to_string(),
        "develop".to_string(),
        "release/*".to_string(),
    ]
}

/// Whether `branch` matches any entry of the protected set.
/// Entries ending in `/*` match by prefix, everything else exactly.
pub fn is_protected(branch: &str, protected: &[String]) -> bool {
    protected.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix("/*") {
            branch.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
        } else {
            branch == pattern
        }
    })
}

/// Handle to one acquired worktree
#[derive(Debug, Clone)]
pub struct Worktree {
    pub task_id: TaskId,
    pub path: PathBuf,
    pub branch: String,
}

/// Manager for task worktrees
pub struct WorktreeManager {
    config: WorktreeConfig,
}

impl WorktreeManager {
    pub fn new(config: WorktreeConfig) -> Self {
        debug!(?config, "WorktreeManager::new");
        Self { config }
    }

    /// Create the checkout for a task: branch `orc/<task-id>` from
    /// `base_branch`, checked out under the base directory, with the
    /// pre-push hook installed.
    pub async fn acquire(&self, task_id: &TaskId, base_branch: &str) -> Result<Worktree, WorktreeError> {
        debug!(%task_id, base_branch, "WorktreeManager::acquire");

        tokio::fs::create_dir_all(&self.config.base_dir)
            .await
            .map_err(|e| WorktreeError::CreateFailed(format!("Failed to create base dir: {}", e)))?;

        let path = self.worktree_path(task_id);
        let branch = self.branch_name(task_id);

        let output = Command::new("git")
            .args([
                "worktree",
                "add",
                &path.display().to_string(),
                "-b",
                &branch,
                base_branch,
            ])
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // The branch can survive a pruned worktree; resume onto it
            if stderr.contains("already exists") {
                let retry = Command::new("git")
                    .args(["worktree", "add", &path.display().to_string(), &branch])
                    .current_dir(&self.config.repo_root)
                    .output()
                    .await
                    .map_err(|e| WorktreeError::GitError(e.to_string()))?;
                if !retry.status.success() {
                    return Err(WorktreeError::CreateFailed(
                        String::from_utf8_lossy(&retry.stderr).to_string(),
                    ));
                }
            } else {
                return Err(WorktreeError::CreateFailed(stderr.to_string()));
            }
        }

        self.install_pre_push_hook(&path).await?;

        info!(%task_id, path = %path.display(), %branch, "Acquired worktree");
        Ok(Worktree {
            task_id: task_id.clone(),
            path,
            branch,
        })
    }

    /// Write a pre-push hook into the worktree that rejects pushes to the
    /// protected set, and point this worktree's hooksPath at it.
    async fn install_pre_push_hook(&self, worktree_path: &Path) -> Result<(), WorktreeError> {
        if self.config.protected_branches.is_empty() {
            return Ok(());
        }

        let hooks_dir = worktree_path.join(".orc-hooks");
        tokio::fs::create_dir_all(&hooks_dir)
            .await
            .map_err(|e| WorktreeError::CreateFailed(e.to_string()))?;

        let patterns = self
            .config
            .protected_branches
            .iter()
            .map(|p| p.trim_end_matches("/*").to_string())
            .collect::<Vec<_>>()
            .join(" ");

        let script = format!(
            "#!/bin/sh\n\
             # Installed by orc: refuse pushes to protected branches.\n\
             while read _local _lsha remote _rsha; do\n\
               ref=${{remote#refs/heads/}}\n\
               for protected in {patterns}; do\n\
                 case \"$ref\" in\n\
                   \"$protected\"|\"$protected\"/*)\n\
                     echo \"orc: push to protected branch '$ref' rejected\" >&2\n\
                     exit 1\n\
                     ;;\n\
                 esac\n\
               done\n\
             done\n\
             exit 0\n"
        );

        let hook_path = hooks_dir.join("pre-push");
        tokio::fs::write(&hook_path, script)
            .await
            .map_err(|e| WorktreeError::CreateFailed(e.to_string()))?;

        // Keep the hook directory out of phase commits
        self.exclude_from_status(".orc-hooks/").await;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            std::fs::set_permissions(&hook_path, perms).map_err(|e| WorktreeError::CreateFailed(e.to_string()))?;
        }

        // Scope hooksPath to this worktree only
        let enable = Command::new("git")
            .args(["config", "extensions.worktreeConfig", "true"])
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;
        if !enable.status.success() {
            warn!("Failed to enable worktree config; pre-push hook not scoped");
            return Ok(());
        }

        let _ = Command::new("git")
            .args(["config", "--worktree", "core.hooksPath", &hooks_dir.display().to_string()])
            .current_dir(worktree_path)
            .output()
            .await;

        debug!(hook = %hook_path.display(), "Installed pre-push hook");
        Ok(())
    }

    /// Append a pattern to the repository's `info/exclude` (shared by all
    /// worktrees) unless it is already present.
    async fn exclude_from_status(&self, pattern: &str) {
        let Ok(output) = Command::new("git")
            .args(["rev-parse", "--git-common-dir"])
            .current_dir(&self.config.repo_root)
            .output()
            .await
        else {
            return;
        };
        let git_dir = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if git_dir.is_empty() {
            return;
        }
        let exclude = self.config.repo_root.join(git_dir).join("info").join("exclude");
        let existing = tokio::fs::read_to_string(&exclude).await.unwrap_or_default();
        if existing.lines().any(|l| l.trim() == pattern) {
            return;
        }
        if let Some(parent) = exclude.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let _ = tokio::fs::write(&exclude, format!("{}{}\n", existing, pattern)).await;
    }

    /// Release a worktree. Prune removes the directory and deletes the
    /// local branch; keep only closes the handle.
    pub async fn release(&self, task_id: &TaskId, policy: ReleasePolicy) -> Result<(), WorktreeError> {
        debug!(%task_id, ?policy, "WorktreeManager::release");
        match policy {
            ReleasePolicy::Keep => Ok(()),
            ReleasePolicy::Prune => self.remove(task_id).await,
        }
    }

    async fn remove(&self, task_id: &TaskId) -> Result<(), WorktreeError> {
        let path = self.worktree_path(task_id);

        if !path.exists() {
            warn!(%task_id, "Worktree does not exist, skipping removal");
            return Ok(());
        }

        let output = Command::new("git")
            .args(["worktree", "remove", &path.display().to_string(), "--force"])
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("is not a working tree") {
                return Err(WorktreeError::RemoveFailed(stderr.to_string()));
            }
        }

        let branch = self.branch_name(task_id);
        let _ = Command::new("git")
            .args(["branch", "-D", &branch])
            .current_dir(&self.config.repo_root)
            .output()
            .await;

        info!(%task_id, "Removed worktree");
        Ok(())
    }

    /// Stage everything and commit inside the worktree. Returns false when
    /// there was nothing to commit.
    pub async fn commit(&self, worktree: &Worktree, message: &str, author: Option<&str>) -> Result<bool, WorktreeError> {
        debug!(task_id = %worktree.task_id, message, "WorktreeManager::commit");

        let status = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&worktree.path)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;

        if status.stdout.is_empty() {
            debug!("No changes to commit");
            return Ok(false);
        }

        let add = Command::new("git")
            .args(["add", "-A"])
            .current_dir(&worktree.path)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;
        if !add.status.success() {
            return Err(WorktreeError::CommitFailed(
                String::from_utf8_lossy(&add.stderr).to_string(),
            ));
        }

        let mut args = vec!["commit".to_string(), "-m".to_string(), message.to_string()];
        if let Some(author) = author {
            args.push("--author".to_string());
            args.push(author.to_string());
        }

        let commit = Command::new("git")
            .args(&args)
            .current_dir(&worktree.path)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;

        if !commit.status.success() {
            return Err(WorktreeError::CommitFailed(
                String::from_utf8_lossy(&commit.stderr).to_string(),
            ));
        }

        Ok(true)
    }

    /// Push the worktree's branch to origin. Refuses protected branches
    /// regardless of how the branch came to be named that way, unless the
    /// configured protected set is explicitly empty.
    pub async fn push(&self, worktree: &Worktree) -> Result<(), WorktreeError> {
        debug!(task_id = %worktree.task_id, branch = %worktree.branch, "WorktreeManager::push");

        if is_protected(&worktree.branch, &self.config.protected_branches) {
            warn!(branch = %worktree.branch, "Push to protected branch rejected");
            return Err(WorktreeError::ProtectedBranch(worktree.branch.clone()));
        }

        let output = Command::new("git")
            .args(["push", "-u", "origin", &worktree.branch])
            .current_dir(&worktree.path)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;

        if !output.status.success() {
            return Err(WorktreeError::PushFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        info!(branch = %worktree.branch, "Pushed branch");
        Ok(())
    }

    /// Files currently modified in the worktree (porcelain parse)
    pub async fn changed_files(&self, worktree: &Worktree) -> Vec<String> {
        let output = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&worktree.path)
            .output()
            .await;

        match output {
            Ok(out) => String::from_utf8_lossy(&out.stdout)
                .lines()
                .filter_map(|line| {
                    let trimmed = line.trim_start();
                    trimmed.split_once(' ').map(|(_, f)| f.trim().to_string())
                })
                .collect(),
            Err(_) => vec![],
        }
    }

    /// Validate the worktree still answers git commands
    pub async fn validate(&self, task_id: &TaskId) -> Result<(), WorktreeError> {
        let path = self.worktree_path(task_id);
        if !path.exists() {
            return Err(WorktreeError::NotFound(task_id.to_string()));
        }

        let output = Command::new("git")
            .args(["status"])
            .current_dir(&path)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;

        if !output.status.success() {
            return Err(WorktreeError::Corrupted(task_id.to_string()));
        }
        Ok(())
    }

    /// Remove worktrees that no longer belong to a live task
    pub async fn cleanup_orphaned(&self, active: &[TaskId]) -> usize {
        let mut cleaned = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.base_dir).await else {
            return 0;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(task_id) = TaskId::parse(name) else {
                continue;
            };
            if active.contains(&task_id) {
                continue;
            }
            info!(%task_id, "Cleaning up orphaned worktree");
            if let Err(e) = self.remove(&task_id).await {
                warn!(%task_id, error = %e, "Failed to remove orphaned worktree");
            } else {
                cleaned += 1;
            }
        }
        cleaned
    }

    pub fn worktree_path(&self, task_id: &TaskId) -> PathBuf {
        self.config.base_dir.join(task_id.as_str())
    }

    pub fn branch_name(&self, task_id: &TaskId) -> String {
        format!("{}/{}", self.config.branch_prefix, task_id)
    }

    pub fn exists(&self, task_id: &TaskId) -> bool {
        self.worktree_path(task_id).exists()
    }

    /// Re-open a handle for an existing worktree (resume path)
    pub fn reopen(&self, task_id: &TaskId) -> Result<Worktree, WorktreeError> {
        let path = self.worktree_path(task_id);
        if !path.exists() {
            return Err(WorktreeError::NotFound(task_id.to_string()));
        }
        Ok(Worktree {
            task_id: task_id.clone(),
            path,
            branch: self.branch_name(task_id),
        })
    }
}
