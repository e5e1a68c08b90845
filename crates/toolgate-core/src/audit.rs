use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use toolgate_policy::{DecisionMethod, PolicyDecision, ToolArgs};

fn default_true() -> bool {
    true
}

fn default_destination() -> String {
    "stdout".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `stdout` (tracing target `audit`) or a file path opened in append mode.
    #[serde(default = "default_destination")]
    pub destination: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: default_destination(),
        }
    }
}

/// Writes one JSON line per permission event.
#[derive(Debug)]
pub struct AuditLogger {
    sink: Sink,
}

#[derive(Debug)]
enum Sink {
    /// Emitted through `tracing` under the `audit` target.
    Tracing,
    Append {
        path: PathBuf,
        file: Mutex<File>,
    },
}

/// One JSON line in the audit trail.
#[derive(Debug, Serialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum AuditEvent<'a> {
    PermissionCheck {
        timestamp: String,
        tool: &'a str,
        args: &'a ToolArgs,
        allowed: bool,
        reason: &'a str,
        method: DecisionMethod,
    },
    PermissionInitError {
        timestamp: String,
        error: String,
    },
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl<'a> AuditEvent<'a> {
    #[must_use]
    pub fn check(tool: &'a str, args: &'a ToolArgs, decision: &'a PolicyDecision) -> Self {
        Self::PermissionCheck {
            timestamp: now(),
            tool,
            args,
            allowed: decision.allowed,
            reason: &decision.reason,
            method: decision.method,
        }
    }

    #[must_use]
    pub fn init_error(error: impl std::fmt::Display) -> Self {
        Self::PermissionInitError {
            timestamp: now(),
            error: format!("{error:#}"),
        }
    }
}

impl AuditLogger {
    /// Open the sink named by `config.destination`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file destination cannot be opened for appending.
    pub async fn from_config(config: &AuditConfig) -> Result<Self, std::io::Error> {
        if config.destination == "stdout" {
            return Ok(Self { sink: Sink::Tracing });
        }
        let path = PathBuf::from(&config.destination);
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            sink: Sink::Append {
                path,
                file: Mutex::new(file),
            },
        })
    }

    pub async fn log(&self, event: &AuditEvent<'_>) {
        let mut line = match serde_json::to_vec(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("audit event not serializable: {e}");
                return;
            }
        };

        match &self.sink {
            Sink::Tracing => {
                tracing::info!(target: "audit", "{}", String::from_utf8_lossy(&line));
            }
            Sink::Append { path, file } => {
                line.push(b'\n');
                let mut file = file.lock().await;
                let written = async {
                    file.write_all(&line).await?;
                    file.flush().await
                };
                if let Err(e) = written.await {
                    tracing::error!(path = %path.display(), "audit write failed: {e}");
                }
            }
        }
    }
}
