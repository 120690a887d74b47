//! Plan runner
//!
//! One per running task. Owns the task-level state machine: finds the
//! resume point, drives each phase through the phase driver, blocks on
//! open decisions, spends the retry budget on retryable phase failures,
//! and fires the completion action when the plan is done.
//!
//! Every step reads its own persisted state first; re-running a completed
//! task is a no-op, and resume after a crash continues from the first
//! phase that is not done.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, eyre};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::domain::{PhaseState, Plan, Task, TaskId, TaskStatus, Weight};
use crate::driver::{FailureKind, PhaseDriver, PhaseOutcome};
use crate::events::{Event, EventBus, EventFilter};
use crate::hosting::{HostingError, HostingProvider};
use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::{PromptContext, PromptLoader};
use crate::store::{StoreError, StoreHandle};
use crate::worktree::{Worktree, WorktreeError, WorktreeManager};

/// Terminal result of one run attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { message: String },
    /// Task is blocked on a decision and the runner stopped waiting
    Blocked { decision_id: u64 },
    Cancelled,
}

/// Runner tuning
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Model name, used for task cost accounting
    pub model: String,

    /// Phase retries available for retryable failures
    pub retry_budget: u32,

    /// How long to wait on an open decision before returning `Blocked`;
    /// None waits indefinitely
    pub block_wait: Option<Duration>,

    /// Per-phase iteration bound applied over the plan catalog default
    pub max_iterations: Option<u32>,

    /// Transcript tail length loaded into resume snapshots
    pub snapshot_tail: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            retry_budget: 2,
            block_wait: None,
            max_iterations: None,
            snapshot_tail: 50,
        }
    }
}

/// Drives one task from its current state to a terminal or suspended state
pub struct PlanRunner {
    store: StoreHandle,
    bus: Arc<EventBus>,
    driver: Arc<PhaseDriver>,
    worktrees: Arc<WorktreeManager>,
    prompts: Arc<PromptLoader>,
    llm: Arc<dyn LlmClient>,
    hosting: Option<Arc<dyn HostingProvider>>,
    config: RunnerConfig,
}

impl PlanRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StoreHandle,
        bus: Arc<EventBus>,
        driver: Arc<PhaseDriver>,
        worktrees: Arc<WorktreeManager>,
        prompts: Arc<PromptLoader>,
        llm: Arc<dyn LlmClient>,
        hosting: Option<Arc<dyn HostingProvider>>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            driver,
            worktrees,
            prompts,
            llm,
            hosting,
            config,
        }
    }

    /// Run the task to a terminal or suspended state
    pub async fn run(&self, task_id: &TaskId, cancel: CancelToken) -> Result<RunOutcome> {
        let mut task = self.store.load_task_required(task_id).await?;
        debug!(%task_id, status = %task.status, "PlanRunner::run");

        // Idempotence: terminal tasks are a no-op
        match task.status {
            TaskStatus::Completed => return Ok(RunOutcome::Completed),
            TaskStatus::Failed => {
                return Ok(RunOutcome::Failed {
                    message: task.last_error.unwrap_or_else(|| "task already failed".to_string()),
                });
            }
            _ => {}
        }

        if task.weight.is_none() {
            self.classify(&mut task).await?;
        }
        let mut plan = Plan::for_weight(task.weight.ok_or_else(|| eyre!("task has no weight after classification"))?);
        if let Some(bound) = self.config.max_iterations {
            for phase in &mut plan.phases {
                phase.max_iterations = bound;
            }
        }

        if matches!(task.status, TaskStatus::Created | TaskStatus::Planned) {
            self.transition(&mut task, TaskStatus::Ready).await?;
        }

        // Claim the task: the optimistic guard stops a second runner
        self.transition(&mut task, TaskStatus::Running).await?;

        let worktree = match self.open_worktree(&mut task).await {
            Ok(worktree) => worktree,
            Err(e) => {
                return self
                    .fail_task(&mut task, format!("worktree acquisition failed: {}", e))
                    .await;
            }
        };

        let outcome = self.run_phases(&mut task, &plan, &worktree, &cancel).await?;

        match &outcome {
            RunOutcome::Completed => info!(%task_id, "Task completed"),
            RunOutcome::Failed { message } => warn!(%task_id, %message, "Task failed"),
            RunOutcome::Blocked { decision_id } => info!(%task_id, decision_id, "Task blocked on decision"),
            RunOutcome::Cancelled => info!(%task_id, "Task cancelled"),
        }
        Ok(outcome)
    }

    async fn run_phases(
        &self,
        task: &mut Task,
        plan: &Plan,
        worktree: &Worktree,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let total = plan.phases.len();

        // Resume point: first phase not yet done
        let mut index = 0;
        while index < total {
            let state = self.store.load_phase(&task.id, &plan.phases[index].id).await?;
            if state.map(|s| s.status.is_done()).unwrap_or(false) {
                index += 1;
            } else {
                break;
            }
        }
        debug!(task_id = %task.id, resume_index = index, total, "Resume point located");

        while index < total {
            if cancel.is_cancelled() {
                return self.cancel_task(task).await;
            }

            let spec = &plan.phases[index];
            task.current_phase = Some(spec.id.clone());
            self.store.update_task(task.clone()).await?;

            // An open decision from a prior run blocks before any driving
            let mut retry_context: Option<String> = None;
            if let Some(open) = self.store.open_decisions(&task.id).await?.into_iter().next() {
                match self.block_on_decision(task, open.id, cancel).await? {
                    BlockResult::Resolved(answer) => retry_context = Some(answer),
                    BlockResult::StillBlocked => return Ok(RunOutcome::Blocked { decision_id: open.id }),
                    BlockResult::Cancelled => return self.cancel_task(task).await,
                }
            }

            let mut retries = 0u32;
            loop {
                let state = self
                    .store
                    .load_phase(&task.id, &spec.id)
                    .await?
                    .unwrap_or_else(|| PhaseState::new(task.id.clone(), &spec.id, &spec.name));

                let iteration = state.iteration;
                let ctx = PromptContext::for_phase(task, spec, iteration, retry_context.clone());
                let prompt = self.prompts.render_phase(spec, &ctx)?;

                let (outcome, usage) = self
                    .driver
                    .run(
                        task,
                        spec,
                        state,
                        index,
                        total,
                        prompt,
                        retry_context.clone(),
                        worktree,
                        cancel,
                    )
                    .await?;

                task.record_usage(&usage, &self.config.model);
                self.store.update_task(task.clone()).await?;

                match outcome {
                    PhaseOutcome::Completed { .. } => break,
                    PhaseOutcome::DecisionPending { decision_id } => {
                        match self.block_on_decision(task, decision_id, cancel).await? {
                            BlockResult::Resolved(answer) => {
                                retry_context = Some(answer);
                                continue;
                            }
                            BlockResult::StillBlocked => return Ok(RunOutcome::Blocked { decision_id }),
                            BlockResult::Cancelled => return self.cancel_task(task).await,
                        }
                    }
                    PhaseOutcome::Failed { kind, message } => {
                        if kind == FailureKind::Cancelled {
                            return self.cancel_task(task).await;
                        }
                        if kind.is_retryable() && retries < self.config.retry_budget {
                            retries += 1;
                            warn!(
                                task_id = %task.id,
                                phase = %spec.id,
                                retries,
                                budget = self.config.retry_budget,
                                "Retrying phase after retryable failure"
                            );
                            retry_context = Some(format!("Previous attempt failed: {}", message));
                            // Fresh attempt: clear the failed state's error
                            let mut fresh = PhaseState::new(task.id.clone(), &spec.id, &spec.name);
                            fresh.iteration = 0;
                            self.store.upsert_phase(fresh).await?;
                            continue;
                        }
                        return self
                            .fail_task(task, format!("phase '{}' failed: {}", spec.id, message))
                            .await;
                    }
                }
            }

            index += 1;
        }

        self.completion_action(task, worktree).await
    }

    /// Classify the task's weight with one schema-constrained call.
    /// Classifier failure falls back to medium with a warning.
    async fn classify(&self, task: &mut Task) -> Result<()> {
        self.transition(task, TaskStatus::Classifying).await?;

        let ctx = PromptContext::for_task(task);
        let prompt = self.prompts.render("classify", &ctx)?;
        let request = CompletionRequest {
            system_prompt: "Classify development tasks by weight. Answer with the schema only.".to_string(),
            messages: vec![crate::llm::Message::user(prompt)],
            json_schema: Some(json!({
                "type": "object",
                "properties": {
                    "weight": {
                        "type": "string",
                        "enum": ["trivial", "small", "medium", "large", "greenfield"]
                    }
                },
                "required": ["weight"]
            })),
            max_tokens: 256,
        };

        let weight = match self.llm.complete(request).await {
            Ok(response) => serde_json::from_str::<serde_json::Value>(&response.content)
                .ok()
                .and_then(|v| v["weight"].as_str().and_then(Weight::parse))
                .unwrap_or_else(|| {
                    warn!(task_id = %task.id, "Classifier returned no usable weight, defaulting to medium");
                    Weight::Medium
                }),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Classifier call failed, defaulting to medium");
                Weight::Medium
            }
        };

        task.set_weight(weight);
        self.store.update_task(task.clone()).await?;
        self.transition(task, TaskStatus::Planned).await?;
        info!(task_id = %task.id, %weight, "Task classified");
        Ok(())
    }

    async fn open_worktree(&self, task: &mut Task) -> Result<Worktree, WorktreeError> {
        let worktree = if self.worktrees.exists(&task.id) {
            self.worktrees.reopen(&task.id)?
        } else {
            self.worktrees.acquire(&task.id, &task.target_branch).await?
        };
        task.worktree_path = Some(worktree.path.display().to_string());
        task.branch = worktree.branch.clone();
        if let Err(e) = self.store.update_task(task.clone()).await {
            warn!(task_id = %task.id, error = %e, "Failed to persist worktree path");
        }
        Ok(worktree)
    }

    /// Transition the task status with the optimistic guard, then publish.
    async fn transition(&self, task: &mut Task, to: TaskStatus) -> Result<()> {
        match self.store.update_task_status(&task.id, to, task.status).await {
            Ok(()) => {
                task.set_status(to);
                self.bus.publish(Event::TaskStatusChanged {
                    task_id: task.id.clone(),
                    status: to,
                });
                Ok(())
            }
            Err(StoreError::StatusConflict { actual, .. }) => Err(eyre!(
                "task {} is already owned by another runner (status {})",
                task.id,
                actual
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Block the task on an open decision and wait for its resolution.
    async fn block_on_decision(&self, task: &mut Task, decision_id: u64, cancel: &CancelToken) -> Result<BlockResult> {
        self.transition(task, TaskStatus::Blocked).await?;

        // Subscribe before re-reading the store so a resolve that lands in
        // between cannot be missed.
        let mut sub = self
            .bus
            .subscribe(EventFilter::for_task(task.id.clone()).with_kinds(["decision.resolved"]));

        let decision = self.store.get_decision(decision_id).await?;
        let answer = if let Some(answer) = decision.answer {
            answer
        } else {
            let wait = async {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        event = sub.recv() => match event {
                            Some(Event::DecisionResolved { decision_id: id, answer, .. }) if id == decision_id => {
                                return Some(answer);
                            }
                            Some(_) => continue,
                            None => return None,
                        },
                        // Resolutions can land from another process (CLI
                        // decide writes the database directly)
                        _ = tokio::time::sleep(Duration::from_secs(2)) => {
                            if let Ok(d) = self.store.get_decision(decision_id).await
                                && let Some(answer) = d.answer
                            {
                                return Some(answer);
                            }
                        }
                    }
                }
            };

            let resolved = match self.config.block_wait {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(answer) => answer,
                    Err(_) => return Ok(BlockResult::StillBlocked),
                },
                None => wait.await,
            };

            match resolved {
                Some(answer) => answer,
                None if cancel.is_cancelled() => return Ok(BlockResult::Cancelled),
                None => return Ok(BlockResult::StillBlocked),
            }
        };

        self.transition(task, TaskStatus::Running).await?;
        info!(task_id = %task.id, decision_id, %answer, "Decision resolved, resuming");
        Ok(BlockResult::Resolved(answer))
    }

    /// Completion action: push the branch and open the pull request.
    /// A missing remote target branch downgrades to a stored warning; a
    /// protected-branch push is a hard failure.
    async fn completion_action(&self, task: &mut Task, worktree: &Worktree) -> Result<RunOutcome> {
        match self.worktrees.push(worktree).await {
            Ok(()) => {
                if let Some(hosting) = &self.hosting {
                    let body = format!(
                        "{}\n\n---\nAutomated change for {} (weight: {}).",
                        task.description,
                        task.id,
                        task.weight.map(|w| w.to_string()).unwrap_or_default(),
                    );
                    match hosting
                        .create_pr(&task.title, &body, &worktree.branch, &task.target_branch)
                        .await
                    {
                        Ok(pr) => {
                            info!(task_id = %task.id, url = %pr.url, "Opened pull request");
                            self.bus.publish(Event::ProgressTick {
                                task_id: task.id.clone(),
                                message: format!("pull request opened: {}", pr.url),
                            });
                        }
                        Err(HostingError::NotFound(m)) => {
                            warn!(task_id = %task.id, "Target branch missing on remote; completing anyway");
                            task.set_error(format!("warning: pull request not created: {}", m));
                        }
                        Err(e) => {
                            warn!(task_id = %task.id, error = %e, "Pull request creation failed; completing anyway");
                            task.set_error(format!("warning: pull request not created: {}", e));
                        }
                    }
                }
            }
            Err(WorktreeError::ProtectedBranch(branch)) => {
                return self
                    .fail_task(task, format!("push to protected branch '{}' rejected", branch))
                    .await;
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Push failed; completing without pull request");
                task.set_error(format!("warning: branch not pushed: {}", e));
            }
        }

        self.transition(task, TaskStatus::Completed).await?;
        self.store.update_task(task.clone()).await?;
        Ok(RunOutcome::Completed)
    }

    async fn fail_task(&self, task: &mut Task, message: String) -> Result<RunOutcome> {
        task.set_error(&message);
        self.store.update_task(task.clone()).await?;
        self.transition(task, TaskStatus::Failed).await?;
        Ok(RunOutcome::Failed { message })
    }

    async fn cancel_task(&self, task: &mut Task) -> Result<RunOutcome> {
        task.set_error("cancelled");
        self.store.update_task(task.clone()).await?;
        self.transition(task, TaskStatus::Failed).await?;
        // Worktree is preserved for forensics
        Ok(RunOutcome::Cancelled)
    }
}

enum BlockResult {
    Resolved(String),
    StillBlocked,
    Cancelled,
}
