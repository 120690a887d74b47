//! Worktree lifecycle
//!
//! Isolated git checkouts, one per running task, with protected-branch
//! enforcement at the code and hook layers.

mod manager;

pub use manager::{
    ReleasePolicy, Worktree, WorktreeConfig, WorktreeError, WorktreeManager, default_protected_branches, is_protected,
};
