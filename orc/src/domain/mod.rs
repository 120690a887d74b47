//! Domain types for the orchestration engine
//!
//! The Task record owns its phase states, transcript entries, and decisions.
//! Plans are read-only descriptors derived from a task's weight and live in
//! the catalog; phases carry their task id alongside instead of back-pointers.

mod decision;
mod id;
mod phase;
mod plan;
mod task;
mod transcript;

pub use decision::Decision;
pub use id::TaskId;
pub use phase::{PhaseState, PhaseStatus};
pub use plan::{GateMode, PhaseSpec, Plan};
pub use task::{Task, TaskStatus, Weight};
pub use transcript::{EntryKind, TranscriptEntry};

/// Current wall-clock time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
