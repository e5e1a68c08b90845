//! Hot reload of static policy rules.
//!
//! A [`ConfigWatcher`] turns filesystem notifications for one file into
//! [`ConfigEvent`]s; a [`PolicyReloader`] re-reads the file on each event and
//! swaps the static rules in the shared [`PolicyStore`]. Session rules are
//! never touched by a reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use toolgate_policy::{PolicyStore, StaticPolicy};

use crate::config::Config;

const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEvent {
    Changed,
}

/// Keeps the debouncer alive for as long as the watcher exists.
#[derive(Debug)]
pub struct ConfigWatcher {
    _forwarder: JoinHandle<()>,
}

fn touches(events: &[DebouncedEvent], filename: &OsString) -> bool {
    events.iter().any(|e| {
        e.kind == DebouncedEventKind::Any && e.path.file_name().is_some_and(|n| n == filename)
    })
}

impl ConfigWatcher {
    /// Watch `path` for modifications, debounced by 500ms.
    ///
    /// The parent directory is watched so editors that replace the file
    /// through a rename are still seen.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` has no parent or filename, or the
    /// filesystem watcher cannot be initialized.
    pub fn start(path: &Path, tx: mpsc::Sender<ConfigEvent>) -> anyhow::Result<Self> {
        let (Some(dir), Some(filename)) = (path.parent(), path.file_name()) else {
            anyhow::bail!("cannot watch `{}`: not a file path", path.display());
        };
        let filename = filename.to_os_string();
        let (raw_tx, mut raw_rx) = mpsc::channel::<()>(16);

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |events: Result<Vec<DebouncedEvent>, notify::Error>| match events {
                Ok(events) if touches(&events, &filename) => {
                    let _ = raw_tx.blocking_send(());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("policy watcher error: {e}"),
            },
        )?;
        debouncer
            .watcher()
            .watch(dir, notify::RecursiveMode::NonRecursive)?;

        let forwarder = tokio::spawn(async move {
            let _debouncer = debouncer;
            while raw_rx.recv().await.is_some() {
                if tx.send(ConfigEvent::Changed).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            _forwarder: forwarder,
        })
    }
}

/// Re-applies the policy file to a live store.
#[derive(Debug, Clone)]
pub struct PolicyReloader {
    path: PathBuf,
    store: Arc<PolicyStore>,
}

impl PolicyReloader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, store: Arc<PolicyStore>) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    /// Load the file and swap in its static rules.
    ///
    /// On failure the current rules stay in effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, cannot be read or parsed, or
    /// contains an invalid glob pattern.
    pub fn reload(&self) -> anyhow::Result<()> {
        if !self.path.exists() {
            anyhow::bail!("policy file `{}` not found", self.path.display());
        }
        let config = Config::load(&self.path)?;
        let policy = StaticPolicy::from_config(&config.policy)?;
        self.store.replace_static(policy);
        Ok(())
    }

    /// Reload on every event until `shutdown` flips to `true` or the event
    /// stream ends.
    #[must_use]
    pub fn spawn(
        self,
        mut events: mpsc::Receiver<ConfigEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(ConfigEvent::Changed) = event else { break };
                        match self.reload() {
                            Ok(()) => tracing::info!(path = %self.path.display(), "policy reloaded"),
                            Err(e) => tracing::warn!(
                                path = %self.path.display(),
                                "policy reload failed, keeping previous rules: {e:#}"
                            ),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("policy reloader stopped");
        })
    }
}
