//! orc - autonomous task orchestration engine
//!
//! orc turns a free-text development task into a sequence of phases
//! executed by an LLM coding assistant. Each task runs inside an isolated
//! git worktree on its own branch; transcripts, token usage, and phase
//! state persist in a per-project SQLite database so execution can pause
//! on ambiguity and resume safely after a crash.
//!
//! # Core guarantees
//!
//! - **Transcript before completion**: every transcript row is durable
//!   before its event is observable on the bus.
//! - **Single writer per task**: a task in `running` is owned by exactly
//!   one plan runner, enforced by an optimistic status guard.
//! - **Protected branches**: pushes to the protected set are refused in
//!   code and by an installed pre-push hook.
//! - **Bounded fan-out**: slow event subscribers drop their own oldest
//!   events; they never block the pipeline.
//!
//! # Modules
//!
//! - [`domain`] - tasks, phases, plans, decisions, transcripts
//! - [`store`] - per-project SQLite persistence and the process lock
//! - [`events`] - typed event bus and stream sinks
//! - [`worktree`] - isolated checkout lifecycle
//! - [`llm`] - LLM client contract and Anthropic implementation
//! - [`driver`] - per-phase execution loop and gates
//! - [`runner`] - per-task state machine
//! - [`scheduler`] - concurrency ceiling, queueing, cancellation
//! - [`hosting`] - pull request providers (GitHub, GitLab)

pub mod cancel;
pub mod cli;
pub mod config;
pub mod domain;
pub mod driver;
pub mod engine;
pub mod events;
pub mod hosting;
pub mod llm;
pub mod prompts;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod worktree;

pub use cancel::CancelToken;
pub use config::{Config, ExecutionConfig, GitConfig, HostingConfig, LlmConfig};
pub use domain::{
    Decision, EntryKind, GateMode, PhaseSpec, PhaseState, PhaseStatus, Plan, Task, TaskId, TaskStatus,
    TranscriptEntry, Weight,
};
pub use driver::{DriverConfig, FailureKind, PhaseDriver, PhaseOutcome};
pub use engine::Engine;
pub use events::{Event, EventBus, EventFilter, Subscription};
pub use hosting::{HostingError, HostingProvider, MergeMethod, PullRequest};
pub use llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, TokenUsage};
pub use prompts::{PromptContext, PromptLoader};
pub use runner::{PlanRunner, RunOutcome, RunnerConfig};
pub use scheduler::{CancelResult, RunRequest, Scheduler, SchedulerConfig, SchedulerError};
pub use store::{ProjectLock, ProjectPaths, Snapshot, StoreError, StoreHandle};
pub use worktree::{ReleasePolicy, Worktree, WorktreeConfig, WorktreeError, WorktreeManager};
