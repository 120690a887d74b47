//! Task record
//!
//! Tracks one development task from creation through its terminal state.
//! A task in `running` is owned by exactly one live plan runner.

use serde::{Deserialize, Serialize};

use super::id::TaskId;
use super::now_ms;
use crate::llm::TokenUsage;

/// Task weight - determines the ordered phase list, immutable once assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    Trivial,
    Small,
    Medium,
    Large,
    Greenfield,
}

impl Weight {
    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trivial" => Some(Self::Trivial),
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            "greenfield" => Some(Self::Greenfield),
            _ => None,
        }
    }
}

impl std::fmt::Display for Weight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trivial => write!(f, "trivial"),
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
            Self::Greenfield => write!(f, "greenfield"),
        }
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by user action, weight may still be unset
    #[default]
    Created,
    /// Classifier is assigning a weight
    Classifying,
    /// Weight assigned, plan derived
    Planned,
    /// Prerequisites met, waiting for a scheduler slot
    Ready,
    /// One live plan runner owns the task
    Running,
    /// Suspended (user pause or crash recovery)
    Paused,
    /// Waiting on an open decision
    Blocked,
    /// All phases done, completion action ran
    Completed,
    /// Unrecoverable failure or cancellation
    Failed,
}

impl TaskStatus {
    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "classifying" => Some(Self::Classifying),
            "planned" => Some(Self::Planned),
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "blocked" => Some(Self::Blocked),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Classifying => write!(f, "classifying"),
            Self::Planned => write!(f, "planned"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Blocked => write!(f, "blocked"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One development task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Human-readable identifier (`TASK-0001`)
    pub id: TaskId,

    /// Short title for display
    pub title: String,

    /// Free-text task description handed to the LLM
    pub description: String,

    /// Optional category label (bug, feature, chore, ...)
    pub category: Option<String>,

    /// Weight; None until classified
    pub weight: Option<Weight>,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Phase currently executing (or last executed)
    pub current_phase: Option<String>,

    /// Work branch (`orc/TASK-0001`)
    pub branch: String,

    /// Branch the completion action targets
    pub target_branch: String,

    /// Absolute worktree path while one is acquired
    pub worktree_path: Option<String>,

    /// Accumulated token counters across all phases
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,

    /// Accumulated cost in USD
    pub cost_usd: f64,

    /// Last error recorded by the runner (if any)
    pub last_error: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Task {
    /// Create a new task record
    pub fn new(id: TaskId, title: impl Into<String>, description: impl Into<String>, target_branch: impl Into<String>) -> Self {
        let now = now_ms();
        let branch = format!("orc/{}", id);
        Self {
            id,
            title: title.into(),
            description: description.into(),
            category: None,
            weight: None,
            status: TaskStatus::Created,
            current_phase: None,
            branch,
            target_branch: target_branch.into(),
            worktree_path: None,
            input_tokens: 0,
            output_tokens: 0,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            cost_usd: 0.0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Assign the weight; immutable once set
    pub fn set_weight(&mut self, weight: Weight) {
        if self.weight.is_none() {
            self.weight = Some(weight);
            self.updated_at = now_ms();
        }
    }

    /// Update the status
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    /// Record the error surfaced by the runner
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.updated_at = now_ms();
    }

    /// Accumulate token usage and cost from one LLM response
    pub fn record_usage(&mut self, usage: &TokenUsage, model: &str) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_creation_tokens += usage.cache_creation_tokens;
        self.cache_read_tokens += usage.cache_read_tokens;
        self.cost_usd += usage.cost_usd(model);
        self.updated_at = now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new(TaskId::from_seq(1), "Fix login", "fix the login bug", "main");
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.branch, "orc/TASK-0001");
        assert_eq!(task.target_branch, "main");
        assert!(task.weight.is_none());
        assert!(task.worktree_path.is_none());
    }

    #[test]
    fn test_weight_immutable_once_set() {
        let mut task = Task::new(TaskId::from_seq(1), "t", "d", "main");
        task.set_weight(Weight::Small);
        task.set_weight(Weight::Large);
        assert_eq!(task.weight, Some(Weight::Small));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TaskStatus::Created,
            TaskStatus::Classifying,
            TaskStatus::Planned,
            TaskStatus::Ready,
            TaskStatus::Running,
            TaskStatus::Paused,
            TaskStatus::Blocked,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(&status.to_string()), Some(status));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_record_usage_accumulates() {
        let mut task = Task::new(TaskId::from_seq(2), "t", "d", "main");
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            cache_creation_tokens: 10,
            cache_read_tokens: 20,
        };
        task.record_usage(&usage, "claude-sonnet-4");
        task.record_usage(&usage, "claude-sonnet-4");
        assert_eq!(task.input_tokens, 200);
        assert_eq!(task.output_tokens, 100);
        assert_eq!(task.cache_creation_tokens, 20);
        assert_eq!(task.cache_read_tokens, 40);
        assert!(task.cost_usd > 0.0);
    }
}
