//! Run scheduling
//!
//! Concurrency ceiling, FIFO overflow queue, and cooperative cancellation
//! with a hard demotion deadline.

mod core;

pub use core::{CancelResult, RunRequest, Scheduler, SchedulerConfig, SchedulerError, SchedulerStatus};
