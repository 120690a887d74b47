//! Phase execution
//!
//! The phase driver runs one phase to a terminal outcome, streaming LLM
//! output into the transcript and evaluating the phase's gate. Terminal
//! markers and structured gate responses are represented as closed sums;
//! the driver loop never inspects raw text twice.

mod engine;
mod gate;
mod markers;

pub use engine::{DriverConfig, FailureKind, PhaseDriver, PhaseOutcome};
pub use gate::{GateError, GateOutcome, decision_schema, parse_schema_response};
pub use markers::{MarkerScanner, TerminalMarker, scan};
