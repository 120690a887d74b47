//! Gate protocol
//!
//! A gate inspects a phase's terminal output and decides whether the phase
//! passed, blocked, or needs an external decision. Decision-gated phases
//! use a schema-constrained LLM call; this module owns that schema and its
//! parsing.

use serde::Deserialize;
use serde_json::json;

use super::markers::TerminalMarker;

/// Verdict of a gate over one phase attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Pass,
    Blocked { reason: String },
    DecisionRequired { question: String, options: Vec<String> },
}

/// Gate evaluation error
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The schema-constrained response did not parse; the message carries
    /// a truncated sample of the offending content.
    #[error("schema response parse failed: {detail} (content={content})")]
    ParseFailed { detail: String, content: String },
}

/// Maximum length of offending content echoed in diagnostics
const CONTENT_SAMPLE_LIMIT: usize = 200;

/// JSON schema for decision-gated phases
pub fn decision_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": ["complete", "blocked", "decision_required"]
            },
            "reason": { "type": "string" },
            "question": { "type": "string" },
            "options": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["status"]
    })
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    options: Option<Vec<String>>,
}

fn content_sample(content: &str) -> String {
    let mut sample: String = content.chars().take(CONTENT_SAMPLE_LIMIT).collect();
    if content.chars().count() > CONTENT_SAMPLE_LIMIT {
        sample.push('…');
    }
    sample
}

/// Parse the structured response of a decision-gated phase
pub fn parse_schema_response(content: &str) -> Result<GateOutcome, GateError> {
    let parsed: SchemaResponse = serde_json::from_str(content).map_err(|e| GateError::ParseFailed {
        detail: e.to_string(),
        content: content_sample(content),
    })?;

    match parsed.status.as_str() {
        "complete" => Ok(GateOutcome::Pass),
        "blocked" => Ok(GateOutcome::Blocked {
            reason: parsed.reason.unwrap_or_else(|| "no reason given".to_string()),
        }),
        "decision_required" => {
            let question = parsed.question.ok_or_else(|| GateError::ParseFailed {
                detail: "decision_required without a question".to_string(),
                content: content_sample(content),
            })?;
            Ok(GateOutcome::DecisionRequired {
                question,
                options: parsed.options.unwrap_or_default(),
            })
        }
        other => Err(GateError::ParseFailed {
            detail: format!("unknown status '{}'", other),
            content: content_sample(content),
        }),
    }
}

/// Lift a text terminal marker into a gate outcome
pub fn outcome_from_marker(marker: &TerminalMarker) -> GateOutcome {
    match marker {
        TerminalMarker::Complete => GateOutcome::Pass,
        TerminalMarker::Blocked { reason } => GateOutcome::Blocked {
            reason: reason.clone(),
        },
    }
}

/// Question posed by a human gate when no resolution exists yet
pub fn human_gate_question(phase_name: &str) -> (String, Vec<String>) {
    (
        format!("Phase '{}' requires human approval before the task can proceed", phase_name),
        vec!["approve".to_string(), "reject".to_string()],
    )
}
