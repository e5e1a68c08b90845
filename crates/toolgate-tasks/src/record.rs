use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn serialize_secs<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => s.serialize_some(&d.as_secs_f64()),
        None => s.serialize_none(),
    }
}

/// What the caller is told about a promoted task. Never changes once issued.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub plugin_name: String,
    pub tool_name: String,
    pub created_at: DateTime<Utc>,
    /// Seconds, when the owning plugin gave an estimate.
    #[serde(serialize_with = "serialize_secs")]
    pub estimated_duration: Option<Duration>,
}

/// Submission parameters for one background task.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub plugin_name: String,
    pub tool_name: String,
    pub estimated_duration: Option<Duration>,
    /// Overrides the registry-wide runtime limit.
    pub max_runtime: Option<Duration>,
}

impl TaskSpec {
    #[must_use]
    pub fn new(plugin_name: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            tool_name: tool_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_estimated_duration(mut self, estimate: Option<Duration>) -> Self {
        self.estimated_duration = estimate;
        self
    }

    #[must_use]
    pub fn with_max_runtime(mut self, limit: Duration) -> Self {
        self.max_runtime = Some(limit);
        self
    }
}

/// Snapshot of one task's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    #[serde(flatten)]
    pub handle: TaskHandle,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub(crate) fn pending(handle: TaskHandle) -> Self {
        Self {
            handle,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.handle.task_id
    }

    /// Move to a terminal state. Returns `false` if already terminal.
    pub(crate) fn finish(&mut self, status: TaskStatus, result: Result<Value, String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        match result {
            Ok(value) => self.result = Some(value),
            Err(error) => self.error = Some(error),
        }
        self.completed_at = Some(Utc::now());
        true
    }
}

/// Result of `TaskRegistry::cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    AlreadyFinished(TaskStatus),
}
