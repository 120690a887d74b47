//! StoreHandle - actor that owns the project database
//!
//! All access goes through a command channel to one actor task, which
//! serializes every write (and read) on the single connection. This is the
//! single-writer discipline: two drivers can never interleave partial
//! transactions, and the optimistic status guard closes the remaining race.

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::error::{StoreError, StoreResult};
use super::messages::StoreCommand;
use super::project::{ProjectStore, Snapshot};
use crate::domain::{Decision, PhaseState, Task, TaskId, TaskStatus, TranscriptEntry, Weight};

/// Cloneable handle to the store actor
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Open the database and spawn the actor
    pub fn spawn(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let store = ProjectStore::open(db_path.as_ref())?;
        Ok(Self::spawn_with(store))
    }

    /// Spawn over an in-memory database (tests)
    pub fn spawn_in_memory() -> StoreResult<Self> {
        Ok(Self::spawn_with(ProjectStore::open_in_memory()?))
    }

    fn spawn_with(store: ProjectStore) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("Store actor spawned");
        Self { tx }
    }

    async fn send<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<StoreResult<T>>) -> StoreCommand,
    ) -> StoreResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StoreError::ChannelClosed)?;
        reply_rx.await.map_err(|_| StoreError::ChannelClosed)?
    }

    pub async fn create_task(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        category: Option<String>,
        weight: Option<Weight>,
        target_branch: impl Into<String>,
    ) -> StoreResult<Task> {
        let (title, description, target_branch) = (title.into(), description.into(), target_branch.into());
        self.send(|reply| StoreCommand::CreateTask {
            title,
            description,
            category,
            weight,
            target_branch,
            reply,
        })
        .await
    }

    pub async fn load_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let id = id.clone();
        self.send(|reply| StoreCommand::LoadTask { id, reply }).await
    }

    /// Load a task, erroring if absent
    pub async fn load_task_required(&self, id: &TaskId) -> StoreResult<Task> {
        self.load_task(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("task {}", id)))
    }

    pub async fn list_tasks(&self, status_filter: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        self.send(|reply| StoreCommand::ListTasks { status_filter, reply }).await
    }

    pub async fn update_task(&self, task: Task) -> StoreResult<()> {
        self.send(|reply| StoreCommand::UpdateTask {
            task: Box::new(task),
            reply,
        })
        .await
    }

    /// Optimistic status transition; fails with `StatusConflict` when the
    /// stored status is not `expected_prev`.
    pub async fn update_task_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        expected_prev: TaskStatus,
    ) -> StoreResult<()> {
        let id = id.clone();
        self.send(|reply| StoreCommand::UpdateTaskStatus {
            id,
            status,
            expected_prev,
            reply,
        })
        .await
    }

    pub async fn upsert_phase(&self, phase: PhaseState) -> StoreResult<()> {
        self.send(|reply| StoreCommand::UpsertPhase {
            phase: Box::new(phase),
            reply,
        })
        .await
    }

    pub async fn load_phase(&self, task_id: &TaskId, phase_id: &str) -> StoreResult<Option<PhaseState>> {
        let (task_id, phase_id) = (task_id.clone(), phase_id.to_string());
        self.send(|reply| StoreCommand::LoadPhase { task_id, phase_id, reply }).await
    }

    pub async fn load_phases(&self, task_id: &TaskId) -> StoreResult<Vec<PhaseState>> {
        let task_id = task_id.clone();
        self.send(|reply| StoreCommand::LoadPhases { task_id, reply }).await
    }

    /// Append a transcript entry; returns the assigned sequence. The write
    /// is durable before this returns, which is what lets callers publish
    /// the matching event afterwards.
    pub async fn append_transcript(&self, entry: TranscriptEntry) -> StoreResult<u64> {
        self.send(|reply| StoreCommand::AppendTranscript {
            entry: Box::new(entry),
            reply,
        })
        .await
    }

    pub async fn load_transcript(&self, task_id: &TaskId, phase_id: &str) -> StoreResult<Vec<TranscriptEntry>> {
        let (task_id, phase_id) = (task_id.clone(), phase_id.to_string());
        self.send(|reply| StoreCommand::LoadTranscript { task_id, phase_id, reply })
            .await
    }

    pub async fn register_decision(&self, decision: Decision) -> StoreResult<u64> {
        self.send(|reply| StoreCommand::RegisterDecision {
            decision: Box::new(decision),
            reply,
        })
        .await
    }

    pub async fn resolve_decision(&self, id: u64, answer: impl Into<String>) -> StoreResult<Decision> {
        let answer = answer.into();
        self.send(|reply| StoreCommand::ResolveDecision { id, answer, reply }).await
    }

    pub async fn get_decision(&self, id: u64) -> StoreResult<Decision> {
        self.send(|reply| StoreCommand::GetDecision { id, reply }).await
    }

    pub async fn open_decisions(&self, task_id: &TaskId) -> StoreResult<Vec<Decision>> {
        let task_id = task_id.clone();
        self.send(|reply| StoreCommand::OpenDecisions { task_id, reply }).await
    }

    pub async fn snapshot(&self, task_id: &TaskId, tail: usize) -> StoreResult<Snapshot> {
        let task_id = task_id.clone();
        self.send(|reply| StoreCommand::Snapshot { task_id, tail, reply }).await
    }

    pub async fn shutdown(&self) -> StoreResult<()> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| StoreError::ChannelClosed)
    }
}

async fn actor_loop(mut store: ProjectStore, mut rx: mpsc::Receiver<StoreCommand>) {
    debug!("Store actor loop started");
    while let Some(command) = rx.recv().await {
        match command {
            StoreCommand::CreateTask {
                title,
                description,
                category,
                weight,
                target_branch,
                reply,
            } => {
                let result = store.create_task(&title, &description, category.as_deref(), weight, &target_branch);
                let _ = reply.send(result);
            }
            StoreCommand::LoadTask { id, reply } => {
                let _ = reply.send(store.load_task(&id));
            }
            StoreCommand::ListTasks { status_filter, reply } => {
                let _ = reply.send(store.list_tasks(status_filter));
            }
            StoreCommand::UpdateTask { task, reply } => {
                let _ = reply.send(store.update_task(&task));
            }
            StoreCommand::UpdateTaskStatus {
                id,
                status,
                expected_prev,
                reply,
            } => {
                let _ = reply.send(store.update_task_status(&id, status, expected_prev));
            }
            StoreCommand::UpsertPhase { phase, reply } => {
                let _ = reply.send(store.upsert_phase(&phase));
            }
            StoreCommand::LoadPhase { task_id, phase_id, reply } => {
                let _ = reply.send(store.load_phase(&task_id, &phase_id));
            }
            StoreCommand::LoadPhases { task_id, reply } => {
                let _ = reply.send(store.load_phases(&task_id));
            }
            StoreCommand::AppendTranscript { entry, reply } => {
                let _ = reply.send(store.append_transcript(&entry));
            }
            StoreCommand::LoadTranscript { task_id, phase_id, reply } => {
                let _ = reply.send(store.load_transcript(&task_id, &phase_id));
            }
            StoreCommand::RegisterDecision { decision, reply } => {
                let _ = reply.send(store.register_decision(&decision));
            }
            StoreCommand::ResolveDecision { id, answer, reply } => {
                let _ = reply.send(store.resolve_decision(id, &answer));
            }
            StoreCommand::GetDecision { id, reply } => {
                let _ = reply.send(store.get_decision(id));
            }
            StoreCommand::OpenDecisions { task_id, reply } => {
                let _ = reply.send(store.open_decisions(&task_id));
            }
            StoreCommand::Snapshot { task_id, tail, reply } => {
                let _ = reply.send(store.snapshot(&task_id, tail));
            }
            StoreCommand::Shutdown => {
                debug!("Store actor shutting down");
                break;
            }
        }
    }
    debug!("Store actor loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_roundtrip() {
        let store = StoreHandle::spawn_in_memory().unwrap();

        let task = store
            .create_task("title", "desc", None, Some(Weight::Trivial), "main")
            .await
            .unwrap();
        assert_eq!(task.id.as_str(), "TASK-0001");

        let loaded = store.load_task_required(&task.id).await.unwrap();
        assert_eq!(loaded.title, "title");

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_status_conflict_surfaces() {
        let store = StoreHandle::spawn_in_memory().unwrap();
        let task = store.create_task("t", "d", None, None, "main").await.unwrap();

        store
            .update_task_status(&task.id, TaskStatus::Ready, TaskStatus::Created)
            .await
            .unwrap();

        let err = store
            .update_task_status(&task.id, TaskStatus::Running, TaskStatus::Created)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusConflict { .. }));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_gap_free() {
        let store = StoreHandle::spawn_in_memory().unwrap();
        let task = store.create_task("t", "d", None, None, "main").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            let task_id = task.id.clone();
            handles.push(tokio::spawn(async move {
                let entry = TranscriptEntry::new(
                    task_id,
                    "implement",
                    crate::domain::EntryKind::AssistantText,
                    format!("chunk {}", i),
                );
                store.append_transcript(entry).await.unwrap()
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort_unstable();
        let expected: Vec<u64> = (1..=10).collect();
        assert_eq!(seqs, expected);

        store.shutdown().await.unwrap();
    }
}
