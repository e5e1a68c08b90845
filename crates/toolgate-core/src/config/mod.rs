mod env;

#[cfg(test)]
mod tests;

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use toolgate_approval::ChannelConfig;
use toolgate_policy::{PolicyConfig, StaticPolicy};
use toolgate_tasks::TasksConfig;

use crate::audit::AuditConfig;

/// Whole configuration file: policy keys at the top level plus one table
/// per subsystem.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(flatten)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Load configuration from a TOML file (JSON when the extension is
    /// `.json`) with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            Self::parse(&content, path)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> anyhow::Result<Self> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(content).context("failed to parse config file")
        } else {
            toml::from_str(content).context("failed to parse config file")
        }
    }

    /// Check everything that would otherwise fail at first use.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid glob patterns, an incomplete channel
    /// section or a zero-sized worker pool.
    pub fn validate(&self) -> anyhow::Result<()> {
        StaticPolicy::from_config(&self.policy).context("invalid policy rules")?;
        self.channel
            .validate()
            .context("invalid approval channel")?;
        if self.tasks.max_concurrent == 0 {
            anyhow::bail!("tasks.max_concurrent must be > 0");
        }
        Ok(())
    }
}
