//! Startup wiring: config resolution, audit sink, gate, executor and reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use toolgate_approval::AnyApprovalChannel;
use toolgate_policy::PolicyStore;
use toolgate_tasks::TaskRegistry;

use crate::audit::{AuditEvent, AuditLogger};
use crate::config::Config;
use crate::executor::ToolExecutor;
use crate::gate::PermissionGate;
use crate::reload::{ConfigWatcher, PolicyReloader};

const DEFAULT_CONFIG_PATH: &str = "config/toolgate.toml";

#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    config_path: PathBuf,
}

/// Watcher plus the task applying its events. Dropping the watcher stops
/// file notifications.
pub struct ReloadBundle {
    pub watcher: ConfigWatcher,
    pub reloader: JoinHandle<()>,
}

impl AppBuilder {
    /// Load and validate the configuration at `path`.
    ///
    /// Validation failures are written to the configured audit sink as
    /// `permission-init-error` events before being returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub async fn from_path(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let config_path = path.into();
        let config = Config::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        let builder = Self::new(config, config_path);
        if let Err(e) = builder.config.validate() {
            let audit = match builder.build_audit().await {
                Ok(audit) => audit,
                Err(open_err) => {
                    tracing::warn!("audit sink unavailable: {open_err:#}");
                    None
                }
            };
            report_init_error(audit.as_deref(), &e).await;
            return Err(e);
        }
        Ok(builder)
    }

    #[must_use]
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// # Errors
    ///
    /// Returns an error if the audit file cannot be opened.
    pub async fn build_audit(&self) -> anyhow::Result<Option<Arc<AuditLogger>>> {
        if !self.config.audit.enabled {
            return Ok(None);
        }
        let logger = AuditLogger::from_config(&self.config.audit)
            .await
            .with_context(|| format!("opening audit sink {}", self.config.audit.destination))?;
        Ok(Some(Arc::new(logger)))
    }

    /// Build the permission gate from config.
    ///
    /// Policy and channel failures are written to the audit sink as
    /// `permission-init-error` events before being returned.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid rules, an unusable channel or an
    /// unopenable audit sink.
    pub async fn build_gate(&self) -> anyhow::Result<PermissionGate> {
        let audit = self.build_audit().await?;

        let built = PolicyStore::from_config(&self.config.policy)
            .context("invalid policy rules")
            .and_then(|store| {
                AnyApprovalChannel::from_config(&self.config.channel)
                    .context("invalid approval channel")
                    .map(|channel| (store, channel))
            });
        let (store, channel) = match built {
            Ok(parts) => parts,
            Err(e) => {
                report_init_error(audit.as_deref(), &e).await;
                return Err(e);
            }
        };

        tracing::info!(
            channel = channel.kind().as_str(),
            default_policy = ?self.config.policy.default_policy,
            "permission gate ready"
        );
        let gate = PermissionGate::new(Arc::new(store), channel, self.config.channel.timeout);
        Ok(match audit {
            Some(audit) => gate.with_audit(audit),
            None => gate,
        })
    }

    /// # Errors
    ///
    /// See [`AppBuilder::build_gate`].
    pub async fn build_executor(&self) -> anyhow::Result<ToolExecutor> {
        let gate = self.build_gate().await?;
        Ok(ToolExecutor::new(gate, TaskRegistry::new(&self.config.tasks)))
    }

    /// Start hot reload of static rules into `store`.
    ///
    /// Returns `None` when the config file cannot be watched; the process
    /// keeps running with the rules it loaded at startup.
    #[must_use]
    pub fn build_reloader(
        &self,
        store: Arc<PolicyStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Option<ReloadBundle> {
        let (tx, rx) = mpsc::channel(4);
        match ConfigWatcher::start(&self.config_path, tx) {
            Ok(watcher) => {
                tracing::info!(path = %self.config_path.display(), "policy watcher started");
                let reloader = PolicyReloader::new(&self.config_path, store).spawn(rx, shutdown);
                Some(ReloadBundle { watcher, reloader })
            }
            Err(e) => {
                tracing::warn!("policy watcher unavailable: {e:#}");
                None
            }
        }
    }

    /// Start the task janitor with the configured interval and retention.
    #[must_use]
    pub fn build_janitor(
        &self,
        tasks: &TaskRegistry,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tasks.spawn_janitor(
            self.config.tasks.janitor_interval(),
            self.config.tasks.retention(),
            shutdown,
        )
    }

    #[must_use]
    pub fn build_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }
}

async fn report_init_error(audit: Option<&AuditLogger>, error: &anyhow::Error) {
    tracing::error!("permission gate initialization failed: {error:#}");
    if let Some(audit) = audit {
        audit.log(&AuditEvent::init_error(error)).await;
    }
}

/// Priority: explicit path > `TOOLGATE_CONFIG` env > `config/toolgate.toml`.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("TOOLGATE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}
