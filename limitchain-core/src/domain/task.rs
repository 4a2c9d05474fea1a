//! Backfill task bookkeeping.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseError;

/// Lifecycle of a backfill task.
///
/// `Pending → Running → {Completed | RateLimited | Interrupted | Failed}`.
/// Every non-completed status is resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    RateLimited,
    Interrupted,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::RateLimited => "rate_limited",
            TaskStatus::Interrupted => "interrupted",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "rate_limited" => Ok(TaskStatus::RateLimited),
            "interrupted" => Ok(TaskStatus::Interrupted),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(ParseError::UnknownTaskStatus(other.to_string())),
        }
    }
}

/// A persisted backfill invocation over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillTask {
    pub id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackfillTask {
    /// New pending task stamped with the current time.
    pub fn pending(id: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            start,
            end,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
