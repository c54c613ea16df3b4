//! Persisted background task rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TaskStatus {
    /// Waiting for a worker.
    Queued = 0,
    /// Running on a worker.
    Processing = 1,
    /// Ended with an error.
    Error = 2,
    /// Ended by cancellation.
    Canceled = 3,
    /// Ended successfully.
    Complete = 4,
}

impl TaskStatus {
    /// Maps a stored integer to a status.
    #[must_use]
    pub const fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Queued),
            1 => Some(Self::Processing),
            2 => Some(Self::Error),
            3 => Some(Self::Canceled),
            4 => Some(Self::Complete),
            _ => None,
        }
    }

    /// Whether the task has reached an end state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Canceled | Self::Complete)
    }
}

/// A persisted background task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task ID.
    pub id: i64,
    /// Current status.
    pub status: TaskStatus,
    /// Job type tag.
    #[serde(rename = "type")]
    pub task_type: i16,
    /// Creator.
    pub user_id: i64,
    /// Job-specific progress stage or index.
    pub progress: i64,
    /// Serialized `{msg, error}` when failed.
    pub error: Option<String>,
    /// Serialized job properties.
    pub props: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Job type tag.
    pub task_type: i16,
    /// Creator.
    pub user_id: i64,
    /// Serialized job properties.
    pub props: String,
}
