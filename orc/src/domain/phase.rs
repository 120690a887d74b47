//! Per-phase runtime state

use serde::{Deserialize, Serialize};

use super::id::TaskId;
use super::now_ms;

/// Phase execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Completed and skipped phases count as done for plan advancement
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Runtime state of one phase of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    /// Owning task
    pub task_id: TaskId,

    /// Phase identifier from the plan (`implement`, ...)
    pub phase_id: String,

    /// Display name
    pub name: String,

    /// Current status
    pub status: PhaseStatus,

    /// Iterations consumed so far (1-indexed after the first pass)
    pub iteration: u32,

    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,

    /// Last error recorded for this phase
    pub last_error: Option<String>,

    /// Structured output captured from the final response, if any
    pub artifact: Option<Vec<u8>>,
}

impl PhaseState {
    /// Fresh pending state for a phase
    pub fn new(task_id: TaskId, phase_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            task_id,
            phase_id: phase_id.into(),
            name: name.into(),
            status: PhaseStatus::Pending,
            iteration: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
            artifact: None,
        }
    }

    /// Mark the phase running, stamping the start time once
    pub fn start(&mut self) {
        self.status = PhaseStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now_ms());
        }
    }

    /// Mark the phase completed
    pub fn complete(&mut self) {
        self.status = PhaseStatus::Completed;
        self.completed_at = Some(now_ms());
        self.last_error = None;
    }

    /// Mark the phase failed with a diagnostic
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = PhaseStatus::Failed;
        self.completed_at = Some(now_ms());
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut phase = PhaseState::new(TaskId::from_seq(1), "implement", "Implement");
        assert_eq!(phase.status, PhaseStatus::Pending);

        phase.start();
        assert_eq!(phase.status, PhaseStatus::Running);
        assert!(phase.started_at.is_some());

        phase.complete();
        assert_eq!(phase.status, PhaseStatus::Completed);
        assert!(phase.completed_at.is_some());
    }

    #[test]
    fn test_start_preserves_first_timestamp() {
        let mut phase = PhaseState::new(TaskId::from_seq(1), "implement", "Implement");
        phase.start();
        let first = phase.started_at;
        phase.start();
        assert_eq!(phase.started_at, first);
    }

    #[test]
    fn test_fail_records_error() {
        let mut phase = PhaseState::new(TaskId::from_seq(1), "implement", "Implement");
        phase.start();
        phase.fail("iteration exhausted after 3 passes");
        assert_eq!(phase.status, PhaseStatus::Failed);
        assert!(phase.last_error.as_deref().unwrap().contains("iteration exhausted"));
    }

    #[test]
    fn test_is_done() {
        assert!(PhaseStatus::Completed.is_done());
        assert!(PhaseStatus::Skipped.is_done());
        assert!(!PhaseStatus::Failed.is_done());
        assert!(!PhaseStatus::Running.is_done());
    }
}
