//! Store error types

use thiserror::Error;

use crate::domain::TaskStatus;

/// Errors from persistence operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Status conflict on {task_id}: expected {expected}, found {actual}")]
    StatusConflict {
        task_id: String,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("Decision {0} already resolved")]
    AlreadyResolved(u64),

    #[error("Project is busy: lock held by another process")]
    ProjectBusy,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store actor unavailable")]
    ChannelClosed,

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
