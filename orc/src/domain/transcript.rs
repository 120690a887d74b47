//! Transcript entries
//!
//! Append-only record of prompts, assistant output, tool calls and results
//! for one phase. Sequence numbers are assigned by the store and are
//! gap-free and monotonic per (task, phase).

use serde::{Deserialize, Serialize};

use super::id::TaskId;
use super::now_ms;

/// Kind of transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Prompt,
    AssistantText,
    ToolCall,
    ToolResult,
    Error,
}

impl EntryKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prompt" => Some(Self::Prompt),
            "assistant_text" => Some(Self::AssistantText),
            "tool_call" => Some(Self::ToolCall),
            "tool_result" => Some(Self::ToolResult),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::AssistantText => write!(f, "assistant_text"),
            Self::ToolCall => write!(f, "tool_call"),
            Self::ToolResult => write!(f, "tool_result"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One transcript row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub task_id: TaskId,
    pub phase_id: String,

    /// Store-assigned sequence, gap-free per phase; 0 before persistence
    pub seq: u64,

    pub kind: EntryKind,
    pub content: String,

    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,

    pub created_at: i64,
}

impl TranscriptEntry {
    /// Build an entry awaiting a store-assigned sequence
    pub fn new(task_id: TaskId, phase_id: impl Into<String>, kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            task_id,
            phase_id: phase_id.into(),
            seq: 0,
            kind,
            content: content.into(),
            input_tokens: 0,
            output_tokens: 0,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            created_at: now_ms(),
        }
    }

    /// Attach token counts from the response summary
    pub fn with_usage(mut self, input: u64, output: u64, cache_creation: u64, cache_read: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self.cache_creation_tokens = cache_creation;
        self.cache_read_tokens = cache_read;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            EntryKind::Prompt,
            EntryKind::AssistantText,
            EntryKind::ToolCall,
            EntryKind::ToolResult,
            EntryKind::Error,
        ] {
            assert_eq!(EntryKind::parse(&kind.to_string()), Some(kind));
        }
    }

    #[test]
    fn test_with_usage() {
        let entry = TranscriptEntry::new(TaskId::from_seq(1), "implement", EntryKind::AssistantText, "done")
            .with_usage(100, 50, 5, 10);
        assert_eq!(entry.input_tokens, 100);
        assert_eq!(entry.output_tokens, 50);
        assert_eq!(entry.cache_creation_tokens, 5);
        assert_eq!(entry.cache_read_tokens, 10);
    }
}
