//! Phase driver
//!
//! Runs one phase of one task to a terminal outcome: completed, failed, or
//! suspended on a decision. The driver owns the iteration loop, streams the
//! LLM response into the transcript, and evaluates the phase's gate. Every
//! transcript row is durable before its chunk event is published.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::gate::{self, GateOutcome};
use super::markers::MarkerScanner;
use crate::cancel::CancelToken;
use crate::domain::{Decision, EntryKind, GateMode, PhaseSpec, PhaseState, Task, TranscriptEntry};
use crate::events::{Event, EventBus};
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StreamChunk, TokenUsage};
use crate::prompts::{PromptContext, PromptLoader};
use crate::store::StoreHandle;
use crate::worktree::{Worktree, WorktreeManager};

/// Backoff schedule for transient LLM failures
const LLM_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_secs(1),
    Duration::from_secs(4),
];

/// Failure classification carried on a failed phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Explicit `<phase_blocked>` or schema `blocked`
    Blocked,
    /// Iteration bound or phase timeout hit
    IterationsExhausted,
    /// LLM hard error after retries
    Llm,
    /// Schema-constrained response did not parse
    SchemaParse,
    /// Cooperative cancel
    Cancelled,
    /// Worktree commit failed
    Worktree,
}

impl FailureKind {
    /// Whether the plan runner may retry the phase with fresh context
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Llm | FailureKind::SchemaParse)
    }
}

/// Terminal outcome of one phase attempt
#[derive(Debug, Clone)]
pub enum PhaseOutcome {
    Completed {
        iterations: u32,
    },
    /// Suspended: a decision row exists and the task should block
    DecisionPending {
        decision_id: u64,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub model: String,
    pub max_tokens: u32,
    /// Soft per-phase timeout; expiry is treated as iteration exhaustion
    pub phase_timeout: Duration,
    /// Transcript truncation bound for tool call/result content
    pub chunk_limit: usize,
    pub commit_author: Option<String>,
    /// Project database path, exported to hooks as ORC_DB_PATH
    pub db_path: PathBuf,
    /// Optional hook command per phase id, run before the first LLM call
    pub phase_hooks: HashMap<String, String>,
}

impl DriverConfig {
    pub fn new(model: impl Into<String>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 16384,
            phase_timeout: Duration::from_secs(30 * 60),
            chunk_limit: 4000,
            commit_author: None,
            db_path: db_path.into(),
            phase_hooks: HashMap::new(),
        }
    }
}

/// Runs one phase to completion
pub struct PhaseDriver {
    store: StoreHandle,
    bus: Arc<EventBus>,
    llm: Arc<dyn LlmClient>,
    worktrees: Arc<WorktreeManager>,
    prompts: Arc<PromptLoader>,
    config: DriverConfig,
}

impl PhaseDriver {
    pub fn new(
        store: StoreHandle,
        bus: Arc<EventBus>,
        llm: Arc<dyn LlmClient>,
        worktrees: Arc<WorktreeManager>,
        prompts: Arc<PromptLoader>,
        config: DriverConfig,
    ) -> Self {
        Self {
            store,
            bus,
            llm,
            worktrees,
            prompts,
            config,
        }
    }

    /// Drive one phase. `prompt` is the fully rendered phase prompt;
    /// `retry_context` carries prior failure diagnostics or a resolved
    /// decision answer.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        task: &Task,
        phase: &PhaseSpec,
        mut state: PhaseState,
        phase_index: usize,
        total_phases: usize,
        prompt: String,
        retry_context: Option<String>,
        worktree: &Worktree,
        cancel: &CancelToken,
    ) -> eyre::Result<(PhaseOutcome, TokenUsage)> {
        let mut usage_total = TokenUsage::default();

        // A human gate that has been approved needs no further dialogue;
        // any other answer blocks the phase.
        if phase.gate == GateMode::Human
            && state.iteration > 0
            && let Some(answer) = retry_context.as_deref()
        {
            return if answer == "approve" {
                let outcome = self.finish_phase(task, phase, &mut state, worktree, None).await?;
                Ok((outcome, usage_total))
            } else {
                let outcome = self
                    .fail_phase(
                        task,
                        phase,
                        &mut state,
                        FailureKind::Blocked,
                        format!("human gate rejected: {}", answer),
                    )
                    .await?;
                Ok((outcome, usage_total))
            };
        }

        state.start();
        self.store.upsert_phase(state.clone()).await?;
        self.bus.publish(Event::PhaseStarted {
            task_id: task.id.clone(),
            phase_id: phase.id.clone(),
            phase_index,
            total_phases,
        });
        info!(task_id = %task.id, phase = %phase.id, "Phase started");

        self.run_hook(task, phase, worktree).await;

        let deadline = Instant::now() + self.config.phase_timeout;
        let mut next_prompt = prompt;

        while state.iteration < phase.max_iterations {
            state.iteration += 1;
            self.store.upsert_phase(state.clone()).await?;
            self.bus.publish(Event::IterationAdvanced {
                task_id: task.id.clone(),
                phase_id: phase.id.clone(),
                iteration: state.iteration,
            });
            debug!(task_id = %task.id, phase = %phase.id, iteration = state.iteration, "Iteration");

            if Instant::now() >= deadline {
                let outcome = self
                    .fail_phase(
                        task,
                        phase,
                        &mut state,
                        FailureKind::IterationsExhausted,
                        format!("iteration exhausted: phase timeout after {:?}", self.config.phase_timeout),
                    )
                    .await?;
                return Ok((outcome, usage_total));
            }

            // Iteration-specific prefix keeps the model oriented on retries
            let iteration_prompt = if state.iteration == 1 {
                next_prompt.clone()
            } else {
                format!("[iteration {}/{}] {}", state.iteration, phase.max_iterations, next_prompt)
            };

            self.append_entry(
                task,
                phase,
                TranscriptEntry::new(task.id.clone(), &phase.id, EntryKind::Prompt, &iteration_prompt),
            )
            .await?;

            let request = CompletionRequest {
                system_prompt: self.system_prompt(task, worktree),
                messages: vec![crate::llm::Message::user(&iteration_prompt)],
                json_schema: (phase.gate == GateMode::Decision).then(gate::decision_schema),
                max_tokens: self.config.max_tokens,
            };

            let streamed = match self.call_llm(task, phase, request, cancel).await? {
                LlmCallResult::Response { scanner, response } => {
                    usage_total.accumulate(&response.usage);
                    (scanner, response)
                }
                LlmCallResult::Cancelled => {
                    let outcome = self
                        .fail_phase(task, phase, &mut state, FailureKind::Cancelled, "cancelled".to_string())
                        .await?;
                    return Ok((outcome, usage_total));
                }
                LlmCallResult::Failed { message } => {
                    let outcome = self
                        .fail_phase(task, phase, &mut state, FailureKind::Llm, message)
                        .await?;
                    return Ok((outcome, usage_total));
                }
            };
            let (scanner, response) = streamed;

            match self.evaluate_gate(phase, &scanner, &response) {
                GateVerdict::Complete => {
                    let artifact =
                        (phase.gate == GateMode::Decision).then(|| response.content.clone().into_bytes());

                    // A completed human gate still needs its approval
                    if phase.gate == GateMode::Human {
                        let (question, options) = gate::human_gate_question(&phase.name);
                        let decision_id = self
                            .register_decision(task, phase, question, options, &mut state)
                            .await?;
                        return Ok((PhaseOutcome::DecisionPending { decision_id }, usage_total));
                    }

                    let outcome = self.finish_phase(task, phase, &mut state, worktree, artifact).await?;
                    return Ok((outcome, usage_total));
                }
                GateVerdict::Blocked { reason } => {
                    let outcome = self
                        .fail_phase(
                            task,
                            phase,
                            &mut state,
                            FailureKind::Blocked,
                            format!("phase blocked: {}", reason),
                        )
                        .await?;
                    return Ok((outcome, usage_total));
                }
                GateVerdict::Decision { question, options } => {
                    let decision_id = self
                        .register_decision(task, phase, question, options, &mut state)
                        .await?;
                    return Ok((PhaseOutcome::DecisionPending { decision_id }, usage_total));
                }
                GateVerdict::SchemaParse { message } => {
                    let outcome = self
                        .fail_phase(task, phase, &mut state, FailureKind::SchemaParse, message)
                        .await?;
                    return Ok((outcome, usage_total));
                }
                GateVerdict::Continue => {
                    // No terminal marker: ask the model to continue or finish
                    let ctx = PromptContext::for_phase(task, phase, state.iteration, retry_context.clone());
                    next_prompt = self.prompts.render_continuation(&ctx)?;
                }
            }
        }

        let outcome = self
            .fail_phase(
                task,
                phase,
                &mut state,
                FailureKind::IterationsExhausted,
                format!("iteration exhausted after {} passes", phase.max_iterations),
            )
            .await?;
        Ok((outcome, usage_total))
    }

    fn system_prompt(&self, task: &Task, worktree: &Worktree) -> String {
        format!(
            "You are an autonomous coding assistant working on task {} ({}).\n\
             Working directory: {}\n\
             Branch: {} (never push to protected branches)",
            task.id,
            task.title,
            worktree.path.display(),
            worktree.branch,
        )
    }

    /// One LLM call with streaming, transcript capture, marker scanning,
    /// cancellation, and the transient retry policy.
    async fn call_llm(
        &self,
        task: &Task,
        phase: &PhaseSpec,
        request: CompletionRequest,
        cancel: &CancelToken,
    ) -> eyre::Result<LlmCallResult> {
        let mut last_error = String::new();

        for attempt in 0..=LLM_RETRY_DELAYS.len() {
            if attempt > 0 {
                let delay = LLM_RETRY_DELAYS[attempt - 1];
                debug!(attempt, ?delay, "Retrying LLM call");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Ok(LlmCallResult::Cancelled),
                }
            }

            match self.stream_once(task, phase, request.clone(), cancel).await? {
                StreamResult::Done { scanner, response } => {
                    return Ok(LlmCallResult::Response { scanner, response });
                }
                StreamResult::Cancelled => return Ok(LlmCallResult::Cancelled),
                StreamResult::Err(e) => {
                    last_error = e.to_string();
                    if let Some(retry_after) = e.retry_after() {
                        // Respect the server's retry-after, bounded
                        let wait = retry_after.min(Duration::from_secs(60));
                        warn!(?wait, "Rate limited");
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = cancel.cancelled() => return Ok(LlmCallResult::Cancelled),
                        }
                    }
                    if !e.is_retryable() {
                        self.append_entry(
                            task,
                            phase,
                            TranscriptEntry::new(task.id.clone(), &phase.id, EntryKind::Error, e.to_string()),
                        )
                        .await?;
                        return Ok(LlmCallResult::Failed {
                            message: format!("llm error: {}", e),
                        });
                    }
                }
            }
        }

        self.append_entry(
            task,
            phase,
            TranscriptEntry::new(task.id.clone(), &phase.id, EntryKind::Error, &last_error),
        )
        .await?;
        Ok(LlmCallResult::Failed {
            message: format!("llm error after {} retries: {}", LLM_RETRY_DELAYS.len(), last_error),
        })
    }

    /// One streaming attempt. Text deltas buffer into a single
    /// assistant_text entry flushed on tool boundaries and at the end;
    /// every entry is durable before its chunk event goes out.
    async fn stream_once(
        &self,
        task: &Task,
        phase: &PhaseSpec,
        request: CompletionRequest,
        cancel: &CancelToken,
    ) -> eyre::Result<StreamResult> {
        let (tx, mut rx) = mpsc::channel::<StreamChunk>(64);
        let llm = Arc::clone(&self.llm);
        let mut call = tokio::spawn(async move { llm.stream(request, tx).await });

        let mut scanner = MarkerScanner::new();
        let mut text_buffer = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    call.abort();
                    // Flush whatever was streamed before the cancel
                    if !text_buffer.is_empty() {
                        self.append_entry(
                            task,
                            phase,
                            TranscriptEntry::new(task.id.clone(), &phase.id, EntryKind::AssistantText, &text_buffer),
                        )
                        .await?;
                    }
                    self.append_entry(
                        task,
                        phase,
                        TranscriptEntry::new(task.id.clone(), &phase.id, EntryKind::Error, "cancelled"),
                    )
                    .await?;
                    return Ok(StreamResult::Cancelled);
                }
                chunk = rx.recv() => {
                    match chunk {
                        Some(StreamChunk::TextDelta(text)) => {
                            scanner.feed(&text);
                            text_buffer.push_str(&text);
                        }
                        Some(StreamChunk::ToolCall { name, input }) => {
                            self.flush_text(task, phase, &mut text_buffer, None).await?;
                            let content = self.truncate_chunk(format!("{}({})", name, input));
                            self.append_entry(
                                task,
                                phase,
                                TranscriptEntry::new(task.id.clone(), &phase.id, EntryKind::ToolCall, content),
                            )
                            .await?;
                        }
                        Some(StreamChunk::ToolResult { content }) => {
                            let content = self.truncate_chunk(content);
                            self.append_entry(
                                task,
                                phase,
                                TranscriptEntry::new(task.id.clone(), &phase.id, EntryKind::ToolResult, content),
                            )
                            .await?;
                        }
                        // Usage is read from the call's summary response
                        Some(StreamChunk::Done { .. }) => {}
                        None => break,
                    }
                }
            }
        }

        let result = match (&mut call).await {
            Ok(Ok(response)) => {
                self.flush_text(task, phase, &mut text_buffer, Some(&response.usage)).await?;
                StreamResult::Done { scanner, response }
            }
            Ok(Err(e)) => StreamResult::Err(e),
            Err(join) => StreamResult::Err(LlmError::Malformed(format!("stream task failed: {}", join))),
        };
        Ok(result)
    }

    async fn flush_text(
        &self,
        task: &Task,
        phase: &PhaseSpec,
        buffer: &mut String,
        usage: Option<&TokenUsage>,
    ) -> eyre::Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let mut entry = TranscriptEntry::new(task.id.clone(), &phase.id, EntryKind::AssistantText, buffer.as_str());
        if let Some(u) = usage {
            entry = entry.with_usage(u.input_tokens, u.output_tokens, u.cache_creation_tokens, u.cache_read_tokens);
        }
        buffer.clear();
        self.append_entry(task, phase, entry).await
    }

    /// Durable append, then publish. The write-order invariant lives here.
    async fn append_entry(&self, task: &Task, phase: &PhaseSpec, entry: TranscriptEntry) -> eyre::Result<()> {
        let kind = entry.kind;
        let content = entry.content.clone();
        let seq = self.store.append_transcript(entry).await?;
        self.bus.publish(Event::TranscriptChunk {
            task_id: task.id.clone(),
            phase_id: phase.id.clone(),
            seq,
            kind,
            content,
        });
        Ok(())
    }

    fn truncate_chunk(&self, content: String) -> String {
        if content.len() <= self.config.chunk_limit {
            return content;
        }
        let mut cut = self.config.chunk_limit;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…[truncated {} bytes]", &content[..cut], content.len() - cut)
    }

    fn evaluate_gate(&self, phase: &PhaseSpec, scanner: &MarkerScanner, response: &CompletionResponse) -> GateVerdict {
        match phase.gate {
            GateMode::Decision => match gate::parse_schema_response(&response.content) {
                Ok(GateOutcome::Pass) => GateVerdict::Complete,
                Ok(GateOutcome::Blocked { reason }) => GateVerdict::Blocked { reason },
                Ok(GateOutcome::DecisionRequired { question, options }) => {
                    GateVerdict::Decision { question, options }
                }
                Err(e) => GateVerdict::SchemaParse { message: e.to_string() },
            },
            GateMode::Auto | GateMode::Human => match scanner.marker() {
                Some(marker) => match gate::outcome_from_marker(marker) {
                    GateOutcome::Pass => GateVerdict::Complete,
                    GateOutcome::Blocked { reason } => GateVerdict::Blocked { reason },
                    GateOutcome::DecisionRequired { .. } => unreachable!("markers never request decisions"),
                },
                None => GateVerdict::Continue,
            },
        }
    }

    async fn register_decision(
        &self,
        task: &Task,
        phase: &PhaseSpec,
        question: String,
        options: Vec<String>,
        state: &mut PhaseState,
    ) -> eyre::Result<u64> {
        let decision = Decision::new(task.id.clone(), &phase.id, &question, options.clone());
        let decision_id = self.store.register_decision(decision).await?;
        self.store.upsert_phase(state.clone()).await?;
        self.bus.publish(Event::DecisionRequired {
            task_id: task.id.clone(),
            phase_id: phase.id.clone(),
            decision_id,
            question,
            options,
        });
        info!(task_id = %task.id, phase = %phase.id, decision_id, "Decision required");
        Ok(decision_id)
    }

    async fn finish_phase(
        &self,
        task: &Task,
        phase: &PhaseSpec,
        state: &mut PhaseState,
        worktree: &Worktree,
        artifact: Option<Vec<u8>>,
    ) -> eyre::Result<PhaseOutcome> {
        let files = self.worktrees.changed_files(worktree).await;
        if !files.is_empty() {
            self.bus.publish(Event::FilesChanged {
                task_id: task.id.clone(),
                files,
            });
        }

        let summary: String = task.title.chars().take(50).collect();
        let message = format!("[{}][{}] {}", task.id, phase.id, summary);
        if let Err(e) = self
            .worktrees
            .commit(worktree, &message, self.config.commit_author.as_deref())
            .await
        {
            return self
                .fail_phase(task, phase, state, FailureKind::Worktree, format!("commit failed: {}", e))
                .await;
        }

        state.artifact = artifact;
        state.complete();
        self.store.upsert_phase(state.clone()).await?;
        self.bus.publish(Event::PhaseCompleted {
            task_id: task.id.clone(),
            phase_id: phase.id.clone(),
            iterations: state.iteration,
        });
        info!(task_id = %task.id, phase = %phase.id, iterations = state.iteration, "Phase completed");
        Ok(PhaseOutcome::Completed {
            iterations: state.iteration,
        })
    }

    async fn fail_phase(
        &self,
        task: &Task,
        phase: &PhaseSpec,
        state: &mut PhaseState,
        kind: FailureKind,
        message: String,
    ) -> eyre::Result<PhaseOutcome> {
        state.fail(&message);
        self.store.upsert_phase(state.clone()).await?;
        self.bus.publish(Event::PhaseFailed {
            task_id: task.id.clone(),
            phase_id: phase.id.clone(),
            error: message.clone(),
        });
        warn!(task_id = %task.id, phase = %phase.id, ?kind, %message, "Phase failed");
        Ok(PhaseOutcome::Failed { kind, message })
    }

    /// Run the configured hook for this phase, if any. Hooks receive the
    /// database path and task id via the environment and query read-only.
    /// A missing, failing, or slow hook never fails the phase.
    async fn run_hook(&self, task: &Task, phase: &PhaseSpec, worktree: &Worktree) {
        let Some(command) = self.config.phase_hooks.get(&phase.id) else {
            return;
        };
        debug!(task_id = %task.id, phase = %phase.id, command, "Running phase hook");

        let result = tokio::time::timeout(
            Duration::from_secs(60),
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&worktree.path)
                .env("ORC_DB_PATH", &self.config.db_path)
                .env("ORC_TASK_ID", task.id.as_str())
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if !output.status.success() => {
                warn!(
                    phase = %phase.id,
                    code = output.status.code().unwrap_or(-1),
                    "Phase hook exited non-zero; ignoring"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(phase = %phase.id, error = %e, "Phase hook failed to spawn; ignoring"),
            Err(_) => warn!(phase = %phase.id, "Phase hook timed out; ignoring"),
        }
    }
}

/// Per-response verdict inside the iteration loop
enum GateVerdict {
    Complete,
    Blocked { reason: String },
    Decision { question: String, options: Vec<String> },
    SchemaParse { message: String },
    Continue,
}

enum LlmCallResult {
    Response {
        scanner: MarkerScanner,
        response: CompletionResponse,
    },
    Cancelled,
    Failed {
        message: String,
    },
}

enum StreamResult {
    Done {
        scanner: MarkerScanner,
        response: CompletionResponse,
    },
    Cancelled,
    Err(LlmError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;
    use crate::worktree::WorktreeConfig;

    fn test_driver() -> PhaseDriver {
        let store = StoreHandle::spawn_in_memory().unwrap();
        let bus = Arc::new(EventBus::with_default_capacity());
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let worktrees = Arc::new(WorktreeManager::new(WorktreeConfig::new(".", "/tmp/orc-test-worktrees")));
        let prompts = Arc::new(PromptLoader::new(None).unwrap());
        PhaseDriver::new(store, bus, llm, worktrees, prompts, DriverConfig::new("claude-sonnet-4", ":memory:"))
    }

    #[tokio::test]
    async fn test_truncate_chunk_bounds_tool_content() {
        let driver = test_driver();
        let short = driver.truncate_chunk("tiny".to_string());
        assert_eq!(short, "tiny");

        let long = driver.truncate_chunk("x".repeat(5000));
        assert!(long.len() < 5000);
        assert!(long.contains("[truncated"));
    }

    #[tokio::test]
    async fn test_truncate_chunk_respects_char_boundaries() {
        let mut driver = test_driver();
        driver.config.chunk_limit = 4;
        // 'é' is two bytes; the cut must not split it
        let out = driver.truncate_chunk("aaaéé".to_string());
        assert!(out.starts_with("aaa…") || out.starts_with("aaa"));
    }

    #[test]
    fn test_failure_kind_retryability() {
        assert!(FailureKind::Llm.is_retryable());
        assert!(FailureKind::SchemaParse.is_retryable());
        assert!(!FailureKind::Blocked.is_retryable());
        assert!(!FailureKind::IterationsExhausted.is_retryable());
        assert!(!FailureKind::Cancelled.is_retryable());
        assert!(!FailureKind::Worktree.is_retryable());
    }

    #[test]
    fn test_driver_config_defaults() {
        let config = DriverConfig::new("claude-sonnet-4", "/tmp/orc.db");
        assert_eq!(config.phase_timeout, Duration::from_secs(30 * 60));
        assert_eq!(config.chunk_limit, 4000);
        assert!(config.phase_hooks.is_empty());
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(
            LLM_RETRY_DELAYS,
            [Duration::from_millis(250), Duration::from_secs(1), Duration::from_secs(4)]
        );
    }
}
