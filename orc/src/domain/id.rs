//! Task identifiers
//!
//! All task IDs use the human-readable format `TASK-0001`. The numeric
//! suffix is allocated sequentially by the project store.

use serde::{Deserialize, Serialize};

/// Prefix shared by every task ID
pub const TASK_ID_PREFIX: &str = "TASK";

/// Human-readable task identifier (`TASK-0001`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Build an ID from a sequence number
    pub fn from_seq(seq: u64) -> Self {
        Self(format!("{}-{:04}", TASK_ID_PREFIX, seq))
    }

    /// Parse an existing ID string, validating the format
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix(TASK_ID_PREFIX)?.strip_prefix('-')?;
        if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self(s.to_string()))
    }

    /// The numeric suffix
    pub fn seq(&self) -> u64 {
        self.0
            .rsplit('-')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
