//! End-to-end pipeline tests
//!
//! These drive the full task pipeline - store, worktrees, driver, runner,
//! scheduler - against a scripted LLM client and real git repositories in
//! temp directories.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;

use orc::domain::{EntryKind, PhaseState, TaskId, TaskStatus, Weight};
use orc::driver::{DriverConfig, PhaseDriver};
use orc::events::{Event, EventBus, EventFilter};
use orc::hosting::{HostingError, HostingProvider, MergeMethod, PullRequest};
use orc::llm::client::mock::{MockLlmClient, ScriptStep};
use orc::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StreamChunk, TokenUsage};
use orc::prompts::PromptLoader;
use orc::runner::{PlanRunner, RunnerConfig};
use orc::scheduler::{CancelResult, RunRequest, Scheduler, SchedulerConfig, SchedulerError};
use orc::store::StoreHandle;
use orc::worktree::{WorktreeConfig, WorktreeManager};

const COMPLETE: &str = "Change made.\n<phase_complete>true</phase_complete>";

async fn git(dir: &Path, args: &[&str]) -> String {
    let out = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).to_string()
}

async fn setup_repo(dir: &Path) {
    git(dir, &["init", "-b", "main"]).await;
    git(dir, &["config", "user.email", "test@test.com"]).await;
    git(dir, &["config", "user.name", "Test"]).await;
    git(dir, &["commit", "--allow-empty", "-m", "initial"]).await;
}

struct Harness {
    store: StoreHandle,
    bus: Arc<EventBus>,
    worktrees: Arc<WorktreeManager>,
    scheduler: Arc<Scheduler>,
}

struct HarnessOptions {
    max_concurrent: usize,
    runner_config: RunnerConfig,
    phase_hooks: HashMap<String, String>,
    protected_branches: Option<Vec<String>>,
    hosting: Option<Arc<dyn HostingProvider>>,
    cancel_grace: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            runner_config: RunnerConfig::default(),
            phase_hooks: HashMap::new(),
            protected_branches: None,
            hosting: None,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Hook that leaves a change for the commit step, standing in for the
/// external assistant editing files.
fn write_file_hook(phase: &str) -> HashMap<String, String> {
    let mut hooks = HashMap::new();
    hooks.insert(phase.to_string(), format!("echo edited-by-{} >> work.txt", phase));
    hooks
}

async fn harness_in(project: &Path, llm: Arc<dyn LlmClient>, options: HarnessOptions) -> Harness {
    let orc_dir = project.join(".orc");
    let store = StoreHandle::spawn(orc_dir.join("orc.db")).unwrap();
    let bus = Arc::new(EventBus::with_default_capacity());

    let mut wt_config = WorktreeConfig::new(project, orc_dir.join("worktrees"));
    if let Some(protected) = options.protected_branches {
        wt_config.protected_branches = protected;
    }
    let worktrees = Arc::new(WorktreeManager::new(wt_config));
    let prompts = Arc::new(PromptLoader::new(None).unwrap());

    let mut driver_config = DriverConfig::new("claude-sonnet-4", orc_dir.join("orc.db"));
    driver_config.phase_hooks = options.phase_hooks;
    let driver = Arc::new(PhaseDriver::new(
        store.clone(),
        Arc::clone(&bus),
        Arc::clone(&llm),
        Arc::clone(&worktrees),
        Arc::clone(&prompts),
        driver_config,
    ));

    let runner = Arc::new(PlanRunner::new(
        store.clone(),
        Arc::clone(&bus),
        driver,
        Arc::clone(&worktrees),
        prompts,
        llm,
        options.hosting.clone(),
        options.runner_config,
    ));

    let scheduler = Scheduler::new(
        runner,
        store.clone(),
        Arc::clone(&worktrees),
        options.hosting,
        SchedulerConfig {
            max_concurrent: options.max_concurrent,
            cancel_grace: options.cancel_grace,
        },
    );

    Harness {
        store,
        bus,
        worktrees,
        scheduler,
    }
}

async fn wait_for_status(store: &StoreHandle, task_id: &TaskId, status: TaskStatus, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let task = store.load_task_required(task_id).await.unwrap();
        if task.status == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {:?}, task is {:?} ({:?})",
            status,
            task.status,
            task.last_error
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

// =============================================================================
// S1: trivial happy path
// =============================================================================

#[tokio::test]
async fn s1_trivial_happy_path() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    let llm = Arc::new(MockLlmClient::new(vec![ScriptStep::text(COMPLETE)]));
    let harness = harness_in(
        project.path(),
        llm,
        HarnessOptions {
            phase_hooks: write_file_hook("implement"),
            ..Default::default()
        },
    )
    .await;

    let task = harness
        .store
        .create_task("Fix login", "the login page 500s", None, Some(Weight::Trivial), "main")
        .await
        .unwrap();
    assert_eq!(task.id.as_str(), "TASK-0001");

    let mut sub = harness.bus.subscribe_with_capacity(EventFilter::all(), 4096);

    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();
    harness.scheduler.wait_for(&task.id).await;

    let done = harness.store.load_task_required(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.input_tokens > 0);
    assert!(done.cost_usd > 0.0);

    // Exactly one commit on the task branch past main
    let count = git(project.path(), &["rev-list", "--count", "main..orc/TASK-0001"]).await;
    assert_eq!(count.trim(), "1");

    // One PhaseCompleted event, and the terminal status change
    let mut phase_completed = 0;
    let mut saw_completed_status = false;
    while let Some(event) = sub.try_recv() {
        match event {
            Event::PhaseCompleted { .. } => phase_completed += 1,
            Event::TaskStatusChanged { status, .. } if status == TaskStatus::Completed => {
                saw_completed_status = true;
            }
            _ => {}
        }
    }
    assert_eq!(phase_completed, 1);
    assert!(saw_completed_status);

    // Transcript has at least prompt + assistant text
    let transcript = harness.store.load_transcript(&task.id, "implement").await.unwrap();
    assert!(transcript.len() >= 2);
    assert_eq!(transcript[0].kind, EntryKind::Prompt);
    assert!(transcript.iter().any(|e| e.kind == EntryKind::AssistantText));
}

// =============================================================================
// S2: iteration exhaustion
// =============================================================================

#[tokio::test]
async fn s2_iteration_exhaustion() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    // Never emits a terminal marker
    let llm = Arc::new(MockLlmClient::new(vec![ScriptStep::text("still thinking...")]).with_repeat_last());
    let harness = harness_in(
        project.path(),
        llm,
        HarnessOptions {
            runner_config: RunnerConfig {
                max_iterations: Some(3),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .await;

    let task = harness
        .store
        .create_task("Endless", "never finishes", None, Some(Weight::Trivial), "main")
        .await
        .unwrap();

    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();
    harness.scheduler.wait_for(&task.id).await;

    let done = harness.store.load_task_required(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.last_error.as_deref().unwrap().contains("iteration exhausted"));

    let phase = harness.store.load_phase(&task.id, "implement").await.unwrap().unwrap();
    assert_eq!(phase.iteration, 3);

    // Worktree retained for forensics
    assert!(harness.worktrees.exists(&task.id));
}

// =============================================================================
// S3: decision pause/resume
// =============================================================================

#[tokio::test]
async fn s3_decision_pause_resume() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    let llm = Arc::new(MockLlmClient::new(vec![
        // spec phase, first attempt: asks for a decision
        ScriptStep::text(r#"{"status": "decision_required", "question": "Use X or Y?", "options": ["X", "Y"]}"#),
        // spec phase, re-run with the answer injected
        ScriptStep::text(r#"{"status": "complete"}"#),
        // tdd_write, implement, review, docs
        ScriptStep::text(COMPLETE),
        ScriptStep::text(COMPLETE),
        ScriptStep::text(COMPLETE),
        ScriptStep::text(COMPLETE),
    ]));
    let harness = harness_in(project.path(), llm, HarnessOptions::default()).await;

    let task = harness
        .store
        .create_task("Add feature", "choose a strategy", None, Some(Weight::Medium), "main")
        .await
        .unwrap();

    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();

    wait_for_status(&harness.store, &task.id, TaskStatus::Blocked, Duration::from_secs(10)).await;

    let open = harness.store.open_decisions(&task.id).await.unwrap();
    assert_eq!(open.len(), 1);
    let decision = &open[0];
    assert_eq!(decision.question, "Use X or Y?");
    assert_eq!(decision.options, vec!["X".to_string(), "Y".to_string()]);

    // Resolve the way the engine does: persist, then wake via the bus
    harness.store.resolve_decision(decision.id, "X").await.unwrap();
    harness.bus.publish(Event::DecisionResolved {
        task_id: task.id.clone(),
        decision_id: decision.id,
        answer: "X".to_string(),
    });

    harness.scheduler.wait_for(&task.id).await;
    let done = harness.store.load_task_required(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    // The re-run prompt carried the resolved answer as retry context
    let transcript = harness.store.load_transcript(&task.id, "spec").await.unwrap();
    let prompts: Vec<_> = transcript.iter().filter(|e| e.kind == EntryKind::Prompt).collect();
    assert!(prompts.len() >= 2);
    assert!(prompts.last().unwrap().content.contains("X"));

    assert!(harness.store.open_decisions(&task.id).await.unwrap().is_empty());
}

// =============================================================================
// S4: crash recovery and resume
// =============================================================================

#[tokio::test]
async fn s4_crash_recovery_resume() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;
    let db_path = project.path().join(".orc").join("orc.db");

    // First process: task mid-implement with flushed transcript chunks
    let task_id = {
        let store = StoreHandle::spawn(&db_path).unwrap();
        let task = store
            .create_task("Resume me", "crash mid-phase", None, Some(Weight::Trivial), "main")
            .await
            .unwrap();
        store
            .update_task_status(&task.id, TaskStatus::Ready, TaskStatus::Created)
            .await
            .unwrap();
        store
            .update_task_status(&task.id, TaskStatus::Running, TaskStatus::Ready)
            .await
            .unwrap();

        let mut phase = PhaseState::new(task.id.clone(), "implement", "Implement");
        phase.start();
        phase.iteration = 1;
        store.upsert_phase(phase).await.unwrap();

        for content in ["first prompt", "partial output"] {
            let entry = orc::domain::TranscriptEntry::new(
                task.id.clone(),
                "implement",
                if content.starts_with("first") {
                    EntryKind::Prompt
                } else {
                    EntryKind::AssistantText
                },
                content,
            );
            store.append_transcript(entry).await.unwrap();
        }
        store.shutdown().await.unwrap();
        task.id
    };

    // "Restart": opening the store demotes running -> paused
    let llm = Arc::new(MockLlmClient::new(vec![ScriptStep::text(COMPLETE)]));
    let harness = harness_in(project.path(), llm, HarnessOptions::default()).await;

    let recovered = harness.store.load_task_required(&task_id).await.unwrap();
    assert_eq!(recovered.status, TaskStatus::Paused);

    // Prior chunks are visible before resuming
    let before = harness.store.load_transcript(&task_id, "implement").await.unwrap();
    assert_eq!(before.len(), 2);

    harness.scheduler.submit(RunRequest::new(task_id.clone())).await.unwrap();
    harness.scheduler.wait_for(&task_id).await;

    let done = harness.store.load_task_required(&task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    // No duplicate or gapped sequences across the crash boundary
    let transcript = harness.store.load_transcript(&task_id, "implement").await.unwrap();
    let seqs: Vec<u64> = transcript.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected);
    assert_eq!(transcript[0].content, "first prompt");

    // Phase iteration advanced monotonically past the crash point
    let phase = harness.store.load_phase(&task_id, "implement").await.unwrap().unwrap();
    assert!(phase.iteration >= 2);
}

// =============================================================================
// S5: protected branch refusal fails the task
// =============================================================================

#[tokio::test]
async fn s5_protected_branch_fails_task() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    let llm = Arc::new(MockLlmClient::new(vec![ScriptStep::text(COMPLETE)]));
    // Protect the engine's own branch prefix so the completion push is
    // guaranteed to hit the guard
    let harness = harness_in(
        project.path(),
        llm,
        HarnessOptions {
            protected_branches: Some(vec!["main".to_string(), "orc/*".to_string()]),
            ..Default::default()
        },
    )
    .await;

    let task = harness
        .store
        .create_task("Sneaky", "would push to protected", None, Some(Weight::Trivial), "main")
        .await
        .unwrap();

    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();
    harness.scheduler.wait_for(&task.id).await;

    let done = harness.store.load_task_required(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.last_error.as_deref().unwrap().contains("protected branch"));
}

// =============================================================================
// S6: concurrency ceiling with FIFO overflow
// =============================================================================

/// LLM that holds every call until a permit is released
struct GatedLlm {
    gate: Arc<Semaphore>,
}

#[async_trait::async_trait]
impl LlmClient for GatedLlm {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let permit = self.gate.acquire().await.map_err(|_| LlmError::EmptyResponse)?;
        permit.forget();
        Ok(CompletionResponse {
            content: COMPLETE.to_string(),
            usage: TokenUsage::default(),
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        let response = self.complete(request).await?;
        let _ = chunk_tx.send(StreamChunk::TextDelta(response.content.clone())).await;
        let _ = chunk_tx
            .send(StreamChunk::Done {
                usage: response.usage.clone(),
            })
            .await;
        Ok(response)
    }
}

#[tokio::test]
async fn s6_concurrency_ceiling() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    let gate = Arc::new(Semaphore::new(0));
    let llm = Arc::new(GatedLlm { gate: Arc::clone(&gate) });
    let harness = harness_in(
        project.path(),
        llm,
        HarnessOptions {
            max_concurrent: 2,
            ..Default::default()
        },
    )
    .await;

    let mut ids = Vec::new();
    for i in 0..3 {
        let task = harness
            .store
            .create_task(&format!("Task {}", i), "concurrent", None, Some(Weight::Trivial), "main")
            .await
            .unwrap();
        ids.push(task.id.clone());
        harness.scheduler.submit(RunRequest::new(task.id)).await.unwrap();
    }

    // Let the first two reach the gated LLM call
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = harness.scheduler.status().await;
    assert_eq!(status.running.len(), 2);
    assert_eq!(status.queued.len(), 1);
    assert_eq!(status.queued[0], ids[2]);

    // Release the first two; the queued task must take the freed slot
    gate.add_permits(2);
    wait_for_status(&harness.store, &ids[2], TaskStatus::Running, Duration::from_secs(10)).await;
    assert!(harness.scheduler.running_count().await <= 2);

    gate.add_permits(1);
    harness.scheduler.drain().await;

    for id in &ids {
        let task = harness.store.load_task_required(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed, "task {} should complete", id);
    }

    // Double-submit of a finished task is a no-op run, not an error; but
    // double-submit of an active task is refused
    let task = harness
        .store
        .create_task("Dup", "d", None, Some(Weight::Trivial), "main")
        .await
        .unwrap();
    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();
    let second = harness.scheduler.submit(RunRequest::new(task.id.clone())).await;
    assert!(second.is_err());
    gate.add_permits(1);
    harness.scheduler.drain().await;
}

// =============================================================================
// Infrastructure errors are refused at the edge
// =============================================================================

/// Hosting provider whose credentials never authenticate
struct FailingAuthHost;

#[async_trait::async_trait]
impl HostingProvider for FailingAuthHost {
    async fn check_auth(&self) -> Result<(), HostingError> {
        Err(HostingError::AuthFailed("bad token".to_string()))
    }

    async fn create_pr(&self, _: &str, _: &str, _: &str, _: &str) -> Result<PullRequest, HostingError> {
        Err(HostingError::AuthFailed("bad token".to_string()))
    }

    async fn get_pr(&self, _: u64) -> Result<PullRequest, HostingError> {
        Err(HostingError::AuthFailed("bad token".to_string()))
    }

    async fn merge_pr(&self, _: u64, _: MergeMethod) -> Result<(), HostingError> {
        Err(HostingError::AuthFailed("bad token".to_string()))
    }

    async fn update_pr_branch(&self, _: u64) -> Result<(), HostingError> {
        Err(HostingError::AuthFailed("bad token".to_string()))
    }

    async fn delete_branch(&self, _: &str) -> Result<(), HostingError> {
        Err(HostingError::AuthFailed("bad token".to_string()))
    }

    async fn find_pr_by_branch(&self, _: &str) -> Result<PullRequest, HostingError> {
        Err(HostingError::NoPrFound)
    }
}

#[tokio::test]
async fn submit_refused_when_hosting_auth_fails() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    let llm = Arc::new(MockLlmClient::new(vec![ScriptStep::text(COMPLETE)]));
    let harness = harness_in(
        project.path(),
        llm,
        HarnessOptions {
            hosting: Some(Arc::new(FailingAuthHost)),
            ..Default::default()
        },
    )
    .await;

    let task = harness
        .store
        .create_task("Refused", "auth never works", None, Some(Weight::Trivial), "main")
        .await
        .unwrap();

    let err = harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap_err();
    assert!(matches!(err, SchedulerError::AuthFailed(_)));

    // Never left a partial task: nothing started, nothing written
    let untouched = harness.store.load_task_required(&task.id).await.unwrap();
    assert_eq!(untouched.status, TaskStatus::Created);
    assert!(!harness.worktrees.exists(&task.id));
    assert_eq!(harness.scheduler.running_count().await, 0);
    assert!(harness.store.load_transcript(&task.id, "implement").await.unwrap().is_empty());
}

// =============================================================================
// Property: transcript durable before events are observable
// =============================================================================

#[tokio::test]
async fn transcript_durable_before_events() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    let llm = Arc::new(MockLlmClient::new(vec![ScriptStep::text_with_tool(
        COMPLETE,
        "write_file",
        r#"{"path": "work.txt"}"#,
        "ok",
    )]));
    let harness = harness_in(project.path(), llm, HarnessOptions::default()).await;

    let task = harness
        .store
        .create_task("Ordered", "event ordering", None, Some(Weight::Trivial), "main")
        .await
        .unwrap();

    let mut sub = harness.bus.subscribe_with_capacity(EventFilter::all(), 4096);
    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();

    // Consume live: every chunk event must already be durable, and by the
    // time PhaseCompleted is observable the whole phase transcript is.
    let store = harness.store.clone();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut seen_completed = false;
    while !seen_completed {
        let event = tokio::time::timeout_at(deadline, sub.recv()).await.expect("timed out").unwrap();
        match event {
            Event::TranscriptChunk { task_id, phase_id, seq, .. } => {
                let transcript = store.load_transcript(&task_id, &phase_id).await.unwrap();
                assert!(
                    transcript.iter().any(|e| e.seq == seq),
                    "chunk seq {} observable before durable",
                    seq
                );
            }
            Event::PhaseCompleted { task_id, phase_id, .. } => {
                let transcript = store.load_transcript(&task_id, &phase_id).await.unwrap();
                let seqs: Vec<u64> = transcript.iter().map(|e| e.seq).collect();
                let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
                assert_eq!(seqs, expected, "gapped transcript at completion");
                assert!(seqs.len() >= 2);
                seen_completed = true;
            }
            _ => {}
        }
    }

    harness.scheduler.wait_for(&task.id).await;
}

// =============================================================================
// Resume idempotence: re-running a completed task is a no-op
// =============================================================================

#[tokio::test]
async fn rerun_of_completed_task_is_noop() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    let llm = Arc::new(MockLlmClient::new(vec![ScriptStep::text(COMPLETE)]));
    let harness = harness_in(project.path(), llm, HarnessOptions::default()).await;

    let task = harness
        .store
        .create_task("Once", "idempotent", None, Some(Weight::Trivial), "main")
        .await
        .unwrap();

    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();
    harness.scheduler.wait_for(&task.id).await;
    let transcript_len = harness.store.load_transcript(&task.id, "implement").await.unwrap().len();

    // Second run: no phase re-runs, no transcript growth, still completed
    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();
    harness.scheduler.wait_for(&task.id).await;

    let done = harness.store.load_task_required(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    let after = harness.store.load_transcript(&task.id, "implement").await.unwrap().len();
    assert_eq!(after, transcript_len);
}

// =============================================================================
// Cooperative cancel reaches a clean terminal state
// =============================================================================

#[tokio::test]
async fn cancel_running_task_is_clean() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    // Zero permits: the run parks inside the LLM call
    let gate = Arc::new(Semaphore::new(0));
    let llm = Arc::new(GatedLlm { gate });
    let harness = harness_in(project.path(), llm, HarnessOptions::default()).await;

    let task = harness
        .store
        .create_task("Cancel me", "long running", None, Some(Weight::Trivial), "main")
        .await
        .unwrap();

    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();
    wait_for_status(&harness.store, &task.id, TaskStatus::Running, Duration::from_secs(10)).await;

    let result = harness.scheduler.cancel(&task.id).await.unwrap();
    assert_eq!(result, CancelResult::Clean);

    let done = harness.store.load_task_required(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.last_error.as_deref(), Some("cancelled"));

    // Worktree preserved for forensics
    assert!(harness.worktrees.exists(&task.id));

    // Transcript was flushed before the terminal state
    let transcript = harness.store.load_transcript(&task.id, "implement").await.unwrap();
    assert!(transcript.iter().any(|e| e.kind == EntryKind::Error && e.content == "cancelled"));
}

// =============================================================================
// Gate conformance: schema-less response on a decision gate fails loudly
// =============================================================================

#[tokio::test]
async fn decision_gate_without_schema_fails_phase() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    // The spec phase has a decision gate; prose is not a schema response.
    // The retry budget re-runs it, so exhaust that too.
    let llm = Arc::new(MockLlmClient::new(vec![ScriptStep::text("I think X is best")]).with_repeat_last());
    let harness = harness_in(
        project.path(),
        llm,
        HarnessOptions {
            runner_config: RunnerConfig {
                retry_budget: 1,
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .await;

    let task = harness
        .store
        .create_task("Bad schema", "no json", None, Some(Weight::Medium), "main")
        .await
        .unwrap();

    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();
    harness.scheduler.wait_for(&task.id).await;

    let done = harness.store.load_task_required(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.last_error.as_deref().unwrap().contains("schema response parse failed"));

    let phase = harness.store.load_phase(&task.id, "spec").await.unwrap().unwrap();
    assert!(phase.last_error.as_deref().unwrap().contains("schema response parse failed"));
}

// =============================================================================
// Classifier assigns a weight when none was given
// =============================================================================

#[tokio::test]
async fn unweighted_task_is_classified_before_running() {
    let project = TempDir::new().unwrap();
    setup_repo(project.path()).await;

    let llm = Arc::new(MockLlmClient::new(vec![
        // classify call
        ScriptStep::text(r#"{"weight": "trivial"}"#),
        // implement
        ScriptStep::text(COMPLETE),
    ]));
    let harness = harness_in(project.path(), llm, HarnessOptions::default()).await;

    let task = harness
        .store
        .create_task("Tiny fix", "one-liner", None, None, "main")
        .await
        .unwrap();
    assert!(task.weight.is_none());

    harness.scheduler.submit(RunRequest::new(task.id.clone())).await.unwrap();
    harness.scheduler.wait_for(&task.id).await;

    let done = harness.store.load_task_required(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.weight, Some(Weight::Trivial));
}
