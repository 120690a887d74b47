//! Scheduler
//!
//! Process-wide coordinator: accepts run requests, enforces the global
//! concurrency ceiling with a FIFO overflow queue, owns cancellation, and
//! keeps a snapshot of active and recent runs. `submit` returns
//! immediately; the run proceeds on a background task.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::domain::{TaskId, TaskStatus};
use crate::hosting::HostingProvider;
use crate::runner::{PlanRunner, RunOutcome};
use crate::store::StoreHandle;
use crate::worktree::{ReleasePolicy, WorktreeManager};

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Task {0} is already running or queued")]
    AlreadyRunning(TaskId),

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task {0} is not active")]
    NotActive(TaskId),

    #[error("Hosting authentication failed: {0}")]
    AuthFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// A run request accepted by `submit`
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task_id: TaskId,
}

impl RunRequest {
    pub fn new(task_id: TaskId) -> Self {
        Self { task_id }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global concurrency ceiling
    pub max_concurrent: usize,

    /// Hard deadline for cancel-to-terminal before force demotion
    pub cancel_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            cancel_grace: Duration::from_secs(30),
        }
    }
}

/// How a cancel concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    /// Removed from the queue before it started
    Dequeued,
    /// Runner acknowledged and reached a terminal state
    Clean,
    /// Grace period expired; run force-demoted and worktree pruned
    Unclean,
}

/// Snapshot of scheduler state
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub running: Vec<TaskId>,
    pub queued: Vec<TaskId>,
    /// Recent terminal runs, newest first
    pub recent: Vec<(TaskId, String)>,
}

struct RunHandle {
    cancel: CancelToken,
    finished: Arc<Notify>,
    is_finished: Arc<AtomicBool>,
    abort: tokio::task::AbortHandle,
}

struct Inner {
    running: HashMap<TaskId, RunHandle>,
    queue: VecDeque<RunRequest>,
    recent: VecDeque<(TaskId, String)>,
}

/// The process-wide scheduler
pub struct Scheduler {
    runner: Arc<PlanRunner>,
    store: StoreHandle,
    worktrees: Arc<WorktreeManager>,
    hosting: Option<Arc<dyn HostingProvider>>,
    config: SchedulerConfig,
    inner: Mutex<Inner>,
}

const RECENT_CAP: usize = 32;

impl Scheduler {
    pub fn new(
        runner: Arc<PlanRunner>,
        store: StoreHandle,
        worktrees: Arc<WorktreeManager>,
        hosting: Option<Arc<dyn HostingProvider>>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runner,
            store,
            worktrees,
            hosting,
            config,
            inner: Mutex::new(Inner {
                running: HashMap::new(),
                queue: VecDeque::new(),
                recent: VecDeque::new(),
            }),
        })
    }

    /// Accept a run request. Returns immediately; the run proceeds in the
    /// background. Refused at the edge, before any state is written: a
    /// task the store does not know, a double-submit for an active task,
    /// or a hosting provider whose credentials do not authenticate.
    pub async fn submit(self: &Arc<Self>, request: RunRequest) -> Result<(), SchedulerError> {
        let task = self
            .store
            .load_task(&request.task_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(request.task_id.clone()))?;
        debug!(task_id = %request.task_id, status = %task.status, "Scheduler::submit");

        if let Some(hosting) = &self.hosting {
            hosting
                .check_auth()
                .await
                .map_err(|e| SchedulerError::AuthFailed(e.to_string()))?;
        }

        let mut inner = self.inner.lock().await;
        if inner.running.contains_key(&request.task_id) || inner.queue.iter().any(|r| r.task_id == request.task_id) {
            return Err(SchedulerError::AlreadyRunning(request.task_id));
        }

        if inner.running.len() < self.config.max_concurrent {
            self.start_run(&mut inner, request);
        } else {
            info!(task_id = %request.task_id, position = inner.queue.len() + 1, "Queued");
            inner.queue.push_back(request);
        }
        Ok(())
    }

    /// Start a run while holding the lock
    fn start_run(self: &Arc<Self>, inner: &mut Inner, request: RunRequest) {
        let task_id = request.task_id.clone();
        let cancel = CancelToken::new();
        let finished = Arc::new(Notify::new());
        let is_finished = Arc::new(AtomicBool::new(false));

        let scheduler = Arc::clone(self);
        let runner = Arc::clone(&self.runner);
        let run_cancel = cancel.clone();
        let run_finished = Arc::clone(&finished);
        let run_is_finished = Arc::clone(&is_finished);
        let run_task_id = task_id.clone();

        let join = tokio::spawn(async move {
            let outcome = runner.run(&run_task_id, run_cancel).await;
            let label = match &outcome {
                Ok(RunOutcome::Completed) => "completed".to_string(),
                Ok(RunOutcome::Failed { message }) => format!("failed: {}", message),
                Ok(RunOutcome::Blocked { .. }) => "blocked".to_string(),
                Ok(RunOutcome::Cancelled) => "cancelled".to_string(),
                Err(e) => format!("error: {}", e),
            };
            if let Err(e) = &outcome {
                warn!(task_id = %run_task_id, error = %e, "Run ended with error");
            }
            run_is_finished.store(true, Ordering::Release);
            run_finished.notify_waiters();
            scheduler.finish_run(&run_task_id, label).await;
        });

        info!(task_id = %task_id, "Run started");
        inner.running.insert(
            task_id,
            RunHandle {
                cancel,
                finished,
                is_finished,
                abort: join.abort_handle(),
            },
        );
    }

    /// Bookkeeping when a run reaches a terminal state; promotes the next
    /// queued request into the freed slot.
    async fn finish_run(self: &Arc<Self>, task_id: &TaskId, label: String) {
        let mut inner = self.inner.lock().await;
        inner.running.remove(task_id);
        inner.recent.push_front((task_id.clone(), label));
        inner.recent.truncate(RECENT_CAP);

        if inner.running.len() < self.config.max_concurrent
            && let Some(next) = inner.queue.pop_front()
        {
            debug!(task_id = %next.task_id, "Promoting from queue");
            self.start_run(&mut inner, next);
        }
    }

    /// Best-effort cooperative cancel. Returns once the runner reaches a
    /// terminal state, or force-demotes after the grace deadline.
    pub async fn cancel(self: &Arc<Self>, task_id: &TaskId) -> Result<CancelResult, SchedulerError> {
        let (cancel, finished, is_finished, abort) = {
            let mut inner = self.inner.lock().await;

            // Queued and not yet started: just drop it
            if let Some(pos) = inner.queue.iter().position(|r| &r.task_id == task_id) {
                inner.queue.remove(pos);
                info!(%task_id, "Cancelled queued run");
                return Ok(CancelResult::Dequeued);
            }

            let handle = inner.running.get(task_id).ok_or_else(|| SchedulerError::NotActive(task_id.clone()))?;
            (
                handle.cancel.clone(),
                Arc::clone(&handle.finished),
                Arc::clone(&handle.is_finished),
                handle.abort.clone(),
            )
        };

        info!(%task_id, "Cancel requested");
        cancel.cancel();

        let deadline = tokio::time::Instant::now() + self.config.cancel_grace;
        loop {
            // Register for the wakeup before checking the flag
            let notified = finished.notified();
            if is_finished.load(Ordering::Acquire) {
                return Ok(CancelResult::Clean);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if is_finished.load(Ordering::Acquire) {
                    return Ok(CancelResult::Clean);
                }
                break;
            }
        }

        // Grace expired: force demotion
        warn!(%task_id, "Cancel grace period expired, force-demoting");
        abort.abort();

        if let Ok(task) = self.store.load_task_required(task_id).await {
            let mut task = task;
            task.set_error("cancelled_unclean");
            let _ = self.store.update_task(task.clone()).await;
            if !task.status.is_terminal() {
                let _ = self.store.update_task_status(task_id, TaskStatus::Failed, task.status).await;
            }
        }
        if let Err(e) = self.worktrees.release(task_id, ReleasePolicy::Prune).await {
            warn!(%task_id, error = %e, "Failed to prune worktree after unclean cancel");
        }

        self.finish_run(task_id, "cancelled_unclean".to_string()).await;
        Ok(CancelResult::Unclean)
    }

    /// Snapshot of active, queued, and recent runs
    pub async fn status(&self) -> SchedulerStatus {
        let inner = self.inner.lock().await;
        SchedulerStatus {
            running: inner.running.keys().cloned().collect(),
            queued: inner.queue.iter().map(|r| r.task_id.clone()).collect(),
            recent: inner.recent.iter().cloned().collect(),
        }
    }

    /// Number of currently running tasks
    pub async fn running_count(&self) -> usize {
        self.inner.lock().await.running.len()
    }

    /// Wait until the given task's run finishes (test and CLI support).
    /// Returns false when the task is not active.
    pub async fn wait_for(&self, task_id: &TaskId) -> bool {
        let (finished, is_finished) = {
            let inner = self.inner.lock().await;
            match inner.running.get(task_id) {
                Some(handle) => (Arc::clone(&handle.finished), Arc::clone(&handle.is_finished)),
                None => return false,
            }
        };
        loop {
            let notified = finished.notified();
            if is_finished.load(Ordering::Acquire) {
                return true;
            }
            notified.await;
        }
    }

    /// Wait until every submitted run (including queued ones) finishes
    pub async fn drain(&self) {
        loop {
            let next = {
                let inner = self.inner.lock().await;
                inner.running.keys().next().cloned()
            };
            match next {
                Some(task_id) => {
                    self.wait_for(&task_id).await;
                }
                None => {
                    let inner = self.inner.lock().await;
                    if inner.queue.is_empty() && inner.running.is_empty() {
                        return;
                    }
                }
            }
            // Give finish_run a chance to clear its bookkeeping
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
