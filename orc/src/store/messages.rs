//! Store actor messages
//!
//! Commands and replies for the single-writer actor that owns the project
//! database connection.

use tokio::sync::oneshot;

use super::error::StoreResult;
use super::project::Snapshot;
use crate::domain::{Decision, PhaseState, Task, TaskId, TaskStatus, TranscriptEntry, Weight};

/// Commands sent to the store actor
pub enum StoreCommand {
    CreateTask {
        title: String,
        description: String,
        category: Option<String>,
        weight: Option<Weight>,
        target_branch: String,
        reply: oneshot::Sender<StoreResult<Task>>,
    },
    LoadTask {
        id: TaskId,
        reply: oneshot::Sender<StoreResult<Option<Task>>>,
    },
    ListTasks {
        status_filter: Option<TaskStatus>,
        reply: oneshot::Sender<StoreResult<Vec<Task>>>,
    },
    UpdateTask {
        task: Box<Task>,
        reply: oneshot::Sender<StoreResult<()>>,
    },
    UpdateTaskStatus {
        id: TaskId,
        status: TaskStatus,
        expected_prev: TaskStatus,
        reply: oneshot::Sender<StoreResult<()>>,
    },
    UpsertPhase {
        phase: Box<PhaseState>,
        reply: oneshot::Sender<StoreResult<()>>,
    },
    LoadPhase {
        task_id: TaskId,
        phase_id: String,
        reply: oneshot::Sender<StoreResult<Option<PhaseState>>>,
    },
    LoadPhases {
        task_id: TaskId,
        reply: oneshot::Sender<StoreResult<Vec<PhaseState>>>,
    },
    AppendTranscript {
        entry: Box<TranscriptEntry>,
        reply: oneshot::Sender<StoreResult<u64>>,
    },
    LoadTranscript {
        task_id: TaskId,
        phase_id: String,
        reply: oneshot::Sender<StoreResult<Vec<TranscriptEntry>>>,
    },
    RegisterDecision {
        decision: Box<Decision>,
        reply: oneshot::Sender<StoreResult<u64>>,
    },
    ResolveDecision {
        id: u64,
        answer: String,
        reply: oneshot::Sender<StoreResult<Decision>>,
    },
    GetDecision {
        id: u64,
        reply: oneshot::Sender<StoreResult<Decision>>,
    },
    OpenDecisions {
        task_id: TaskId,
        reply: oneshot::Sender<StoreResult<Vec<Decision>>>,
    },
    Snapshot {
        task_id: TaskId,
        tail: usize,
        reply: oneshot::Sender<StoreResult<Snapshot>>,
    },
    Shutdown,
}
