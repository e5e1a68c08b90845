//! Permission gate and tool dispatcher.
//!
//! Every tool call goes through [`PermissionGate::check`] before its body
//! runs. Plugins that opt into [`AutoBackground`] have slow calls handed off
//! to the task registry once their threshold passes.

pub mod audit;
pub mod bootstrap;
pub mod config;
pub mod executor;
pub mod gate;
pub mod plugin;
pub mod reload;

pub use audit::{AuditConfig, AuditEvent, AuditLogger};
pub use bootstrap::{AppBuilder, ReloadBundle, resolve_config_path};
pub use config::Config;
pub use executor::{ExecutionOutcome, ToolExecutor};
pub use gate::PermissionGate;
pub use plugin::{AutoBackground, CallContext, FnTool, Plugin, Tool, ToolFailure, ToolFuture};
pub use reload::{ConfigEvent, ConfigWatcher, PolicyReloader};
