//! Event types published on the bus
//!
//! Every significant action in the pipeline emits one of these. Events are
//! tagged with their task id; per-task publish order is preserved for each
//! subscriber.

use serde::{Deserialize, Serialize};

use crate::domain::{EntryKind, TaskId, TaskStatus};

/// Typed event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PhaseStarted {
        task_id: TaskId,
        phase_id: String,
        phase_index: usize,
        total_phases: usize,
    },
    PhaseCompleted {
        task_id: TaskId,
        phase_id: String,
        iterations: u32,
    },
    PhaseFailed {
        task_id: TaskId,
        phase_id: String,
        error: String,
    },
    IterationAdvanced {
        task_id: TaskId,
        phase_id: String,
        iteration: u32,
    },
    TranscriptChunk {
        task_id: TaskId,
        phase_id: String,
        seq: u64,
        kind: EntryKind,
        content: String,
    },
    DecisionRequired {
        task_id: TaskId,
        phase_id: String,
        decision_id: u64,
        question: String,
        options: Vec<String>,
    },
    DecisionResolved {
        task_id: TaskId,
        decision_id: u64,
        answer: String,
    },
    TaskStatusChanged {
        task_id: TaskId,
        status: TaskStatus,
    },
    ProgressTick {
        task_id: TaskId,
        message: String,
    },
    FilesChanged {
        task_id: TaskId,
        files: Vec<String>,
    },
}

impl Event {
    /// Task this event belongs to
    pub fn task_id(&self) -> &TaskId {
        match self {
            Event::PhaseStarted { task_id, .. }
            | Event::PhaseCompleted { task_id, .. }
            | Event::PhaseFailed { task_id, .. }
            | Event::IterationAdvanced { task_id, .. }
            | Event::TranscriptChunk { task_id, .. }
            | Event::DecisionRequired { task_id, .. }
            | Event::DecisionResolved { task_id, .. }
            | Event::TaskStatusChanged { task_id, .. }
            | Event::ProgressTick { task_id, .. }
            | Event::FilesChanged { task_id, .. } => task_id,
        }
    }

    /// Stable name for filtering and display
    pub fn kind(&self) -> &'static str {
        match self {
            Event::PhaseStarted { .. } => "phase.start",
            Event::PhaseCompleted { .. } => "phase.complete",
            Event::PhaseFailed { .. } => "phase.fail",
            Event::IterationAdvanced { .. } => "iteration.advance",
            Event::TranscriptChunk { .. } => "transcript.chunk",
            Event::DecisionRequired { .. } => "decision.required",
            Event::DecisionResolved { .. } => "decision.resolved",
            Event::TaskStatusChanged { .. } => "task.status",
            Event::ProgressTick { .. } => "progress.tick",
            Event::FilesChanged { .. } => "files.changed",
        }
    }
}
