//! Event stream sinks
//!
//! Two external renderings of the bus: a human-formatted text stream for
//! the CLI and JSON frames for WebSocket broadcast. Both consume from a
//! Subscription, so they inherit the bounded-queue overflow semantics.

use colored::Colorize;
use serde_json::json;

use super::bus::Subscription;
use super::types::Event;
use crate::domain::EntryKind;

/// Render one event as a human-readable line (or block)
pub fn format_event(event: &Event) -> String {
    match event {
        Event::PhaseStarted {
            task_id,
            phase_id,
            phase_index,
            total_phases,
        } => format!(
            "{} [{}] phase {} ({}/{})",
            "▶".green(),
            task_id,
            phase_id.bold(),
            phase_index + 1,
            total_phases
        ),
        Event::PhaseCompleted {
            task_id,
            phase_id,
            iterations,
        } => format!(
            "{} [{}] phase {} completed after {} iteration(s)",
            "✓".green(),
            task_id,
            phase_id.bold(),
            iterations
        ),
        Event::PhaseFailed { task_id, phase_id, error } => {
            format!("{} [{}] phase {} failed: {}", "✗".red(), task_id, phase_id.bold(), error)
        }
        Event::IterationAdvanced {
            task_id,
            phase_id,
            iteration,
        } => format!("{} [{}] {} iteration {}", "↻".yellow(), task_id, phase_id, iteration),
        Event::TranscriptChunk { kind, content, .. } => match kind {
            EntryKind::Prompt => format!("{}\n{}", "── prompt ──".dimmed(), content.dimmed()),
            EntryKind::AssistantText => content.clone(),
            EntryKind::ToolCall => format!("{} {}", "tool:".cyan(), content),
            EntryKind::ToolResult => format!("{} {}", "result:".cyan().dimmed(), content.dimmed()),
            EntryKind::Error => format!("{} {}", "error:".red(), content),
        },
        Event::DecisionRequired {
            task_id,
            question,
            options,
            ..
        } => format!(
            "{} [{}] decision required: {} [{}]",
            "?".magenta().bold(),
            task_id,
            question,
            options.join(" | ")
        ),
        Event::DecisionResolved { task_id, answer, .. } => {
            format!("{} [{}] decision resolved: {}", "!".magenta(), task_id, answer)
        }
        Event::TaskStatusChanged { task_id, status } => {
            format!("{} [{}] status → {}", "•".blue(), task_id, status)
        }
        Event::ProgressTick { task_id, message } => format!("{} [{}] {}", "·".dimmed(), task_id, message),
        Event::FilesChanged { task_id, files } => {
            format!("{} [{}] files changed: {}", "Δ".yellow(), task_id, files.join(", "))
        }
    }
}

/// Encode events as WebSocket JSON frames with a per-connection sequence
#[derive(Debug, Default)]
pub struct JsonFrameEncoder {
    seq: u64,
}

impl JsonFrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{type, task_id, payload, seq}`
    pub fn encode(&mut self, event: &Event) -> serde_json::Value {
        self.seq += 1;
        json!({
            "type": event.kind(),
            "task_id": event.task_id().as_str(),
            "payload": serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            "seq": self.seq,
        })
    }
}

/// Drain a subscription to stdout until it closes
pub async fn run_text_sink(mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        println!("{}", format_event(&event));
    }
}

/// Drain a subscription as JSON lines to stdout until it closes
pub async fn run_json_sink(mut subscription: Subscription) {
    let mut encoder = JsonFrameEncoder::new();
    while let Some(event) = subscription.recv().await {
        println!("{}", encoder.encode(&event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskStatus};

    #[test]
    fn test_format_phase_events() {
        let started = Event::PhaseStarted {
            task_id: TaskId::from_seq(1),
            phase_id: "implement".to_string(),
            phase_index: 0,
            total_phases: 2,
        };
        let line = format_event(&started);
        assert!(line.contains("TASK-0001"));
        assert!(line.contains("implement"));
        assert!(line.contains("1/2"));
    }

    #[test]
    fn test_json_frames_have_monotonic_seq() {
        let mut encoder = JsonFrameEncoder::new();
        let event = Event::TaskStatusChanged {
            task_id: TaskId::from_seq(3),
            status: TaskStatus::Completed,
        };

        let first = encoder.encode(&event);
        let second = encoder.encode(&event);

        assert_eq!(first["seq"], 1);
        assert_eq!(second["seq"], 2);
        assert_eq!(first["type"], "task.status");
        assert_eq!(first["task_id"], "TASK-0003");
        assert_eq!(first["payload"]["status"], "completed");
    }
}
