use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_max_concurrent() -> usize {
    8
}

fn default_max_pending() -> usize {
    64
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_janitor_interval_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TasksConfig {
    /// Bodies allowed to run at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Unfinished tasks allowed before `submit` fails.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    /// Terminal records older than this are purged by the janitor.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_pending: default_max_pending(),
            max_runtime_secs: None,
            retention_secs: default_retention_secs(),
            janitor_interval_secs: default_janitor_interval_secs(),
        }
    }
}

impl TasksConfig {
    #[must_use]
    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    #[must_use]
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }
}
