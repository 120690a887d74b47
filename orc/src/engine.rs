//! Engine assembly
//!
//! The Engine owns every collaborator explicitly - store, event bus,
//! worktree manager, LLM client, hosting provider, scheduler - and is the
//! single value a host (CLI, server) holds. No process-wide singletons.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{Task, TaskId, TaskStatus, Weight};
use crate::driver::{DriverConfig, PhaseDriver};
use crate::events::{Event, EventBus};
use crate::hosting::HostingProvider;
use crate::llm::LlmClient;
use crate::prompts::PromptLoader;
use crate::runner::{PlanRunner, RunnerConfig};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::store::{ProjectLock, ProjectPaths, Registry, StoreHandle};
use crate::worktree::{WorktreeConfig, WorktreeManager};

/// One engine instance bound to one project
pub struct Engine {
    pub config: Config,
    pub paths: ProjectPaths,
    pub store: StoreHandle,
    pub bus: Arc<EventBus>,
    pub worktrees: Arc<WorktreeManager>,
    pub scheduler: Arc<Scheduler>,
    // Held for the engine's lifetime; releases on drop
    _lock: ProjectLock,
}

impl Engine {
    /// Open the engine for a project: take the process lock, open the
    /// store (which demotes crashed tasks), record the project in the
    /// registry, and assemble the pipeline.
    pub async fn open(
        project_root: &Path,
        config: Config,
        llm: Arc<dyn LlmClient>,
        hosting: Option<Arc<dyn HostingProvider>>,
    ) -> Result<Self> {
        let paths = ProjectPaths::new(project_root);
        let lock = ProjectLock::acquire(paths.lock_path()).context("another orc process owns this project")?;

        let store = StoreHandle::spawn(paths.db_path())?;
        let bus = Arc::new(EventBus::with_default_capacity());

        let mut worktree_config = WorktreeConfig::new(paths.project_root(), paths.worktrees_dir());
        worktree_config.protected_branches = config.git.protected_branches.clone();
        let worktrees = Arc::new(WorktreeManager::new(worktree_config));

        let prompts = Arc::new(PromptLoader::new(config.execution.prompt_dir.clone())?);

        let mut driver_config = DriverConfig::new(config.llm.model.clone(), paths.db_path());
        driver_config.max_tokens = config.llm.max_tokens;
        driver_config.phase_timeout = Duration::from_secs(config.execution.phase_timeout_mins * 60);
        driver_config.chunk_limit = config.execution.chunk_limit;
        driver_config.commit_author = config.git.commit_author.clone();
        driver_config.phase_hooks = config.execution.phase_hooks.clone();

        let driver = Arc::new(PhaseDriver::new(
            store.clone(),
            Arc::clone(&bus),
            Arc::clone(&llm),
            Arc::clone(&worktrees),
            Arc::clone(&prompts),
            driver_config,
        ));

        let runner_config = RunnerConfig {
            model: config.llm.model.clone(),
            retry_budget: config.execution.retry_budget,
            block_wait: None,
            max_iterations: Some(config.execution.max_iterations),
            snapshot_tail: 50,
        };
        let runner = Arc::new(PlanRunner::new(
            store.clone(),
            Arc::clone(&bus),
            driver,
            Arc::clone(&worktrees),
            prompts,
            llm,
            hosting.clone(),
            runner_config,
        ));

        let scheduler = Scheduler::new(
            runner,
            store.clone(),
            Arc::clone(&worktrees),
            hosting,
            SchedulerConfig {
                max_concurrent: config.concurrency.max_tasks,
                cancel_grace: Duration::from_secs(config.concurrency.cancel_grace_secs),
            },
        );

        // Best-effort registry entry for discovery tooling
        let project_name = project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| project_root.display().to_string());
        match Registry::open(&Registry::default_path()) {
            Ok(registry) => {
                if let Err(e) = registry.record_project(project_root, &project_name) {
                    warn!(error = %e, "Failed to record project in registry");
                }
            }
            Err(e) => warn!(error = %e, "Failed to open project registry"),
        }

        let engine = Self {
            config,
            paths,
            store,
            bus,
            worktrees,
            scheduler,
            _lock: lock,
        };
        engine.startup_cleanup().await;

        info!(project = %project_root.display(), "Engine opened");
        Ok(engine)
    }

    /// Prune worktrees whose task is completed or unknown. Failed tasks
    /// keep theirs for forensics.
    async fn startup_cleanup(&self) {
        let active = match self.store.list_tasks(None).await {
            Ok(tasks) => tasks
                .into_iter()
                .filter(|t| t.status != TaskStatus::Completed)
                .map(|t| t.id)
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "Failed to list tasks for worktree cleanup");
                return;
            }
        };
        let cleaned = self.worktrees.cleanup_orphaned(&active).await;
        if cleaned > 0 {
            info!(cleaned, "Pruned orphaned worktrees");
        }
    }

    /// Create a task and its attachment directory
    pub async fn create_task(
        &self,
        title: &str,
        description: &str,
        category: Option<String>,
        weight: Option<Weight>,
    ) -> Result<Task> {
        let task = self
            .store
            .create_task(title, description, category, weight, &self.config.git.target_branch)
            .await?;

        let attachments = self.paths.attachments_dir(&task.id);
        if let Err(e) = tokio::fs::create_dir_all(&attachments).await {
            warn!(task_id = %task.id, error = %e, "Failed to create attachments directory");
        }

        self.bus.publish(Event::TaskStatusChanged {
            task_id: task.id.clone(),
            status: task.status,
        });
        Ok(task)
    }

    /// Resolve a decision and wake any blocked runner
    pub async fn resolve_decision(&self, decision_id: u64, answer: &str) -> Result<()> {
        let decision = self.store.resolve_decision(decision_id, answer).await?;
        self.bus.publish(Event::DecisionResolved {
            task_id: decision.task_id,
            decision_id,
            answer: answer.to_string(),
        });
        Ok(())
    }

    /// Convenience accessor for a task
    pub async fn task(&self, id: &TaskId) -> Result<Task> {
        Ok(self.store.load_task_required(id).await?)
    }
}
