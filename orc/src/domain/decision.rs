//! Decision records
//!
//! A gate that cannot resolve a phase on its own persists a decision: a
//! structured question that blocks the task until an external actor answers.

use serde::{Deserialize, Serialize};

use super::id::TaskId;
use super::now_ms;

/// A persisted question blocking a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Store-assigned id; 0 before persistence
    pub id: u64,

    pub task_id: TaskId,
    pub phase_id: String,

    /// The question posed by the gate
    pub question: String,

    /// Answer options offered to the resolver
    pub options: Vec<String>,

    /// The recorded answer, once resolved
    pub answer: Option<String>,

    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

impl Decision {
    pub fn new(task_id: TaskId, phase_id: impl Into<String>, question: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            id: 0,
            task_id,
            phase_id: phase_id.into(),
            question: question.into(),
            options,
            answer: None,
            created_at: now_ms(),
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.answer.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_decision_is_open() {
        let d = Decision::new(
            TaskId::from_seq(3),
            "spec",
            "Use X or Y?",
            vec!["X".to_string(), "Y".to_string()],
        );
        assert!(d.is_open());
        assert!(d.resolved_at.is_none());
        assert_eq!(d.options.len(), 2);
    }
}
