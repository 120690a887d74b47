//! Task-level execution

mod plan_runner;

pub use plan_runner::{PlanRunner, RunOutcome, RunnerConfig};
