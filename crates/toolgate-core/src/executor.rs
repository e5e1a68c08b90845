use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Value, json};
use toolgate_approval::{AnyApprovalChannel, ApprovalChannel};
use toolgate_policy::{PolicyDecision, ToolArgs};
use toolgate_tasks::{
    CancelOutcome, TaskError, TaskHandle, TaskRecord, TaskRegistry, TaskSpec, TaskStatus,
};

use crate::gate::PermissionGate;
use crate::plugin::{CallContext, Plugin, Tool, ToolFailure};

/// Result of one dispatched tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed {
        value: Value,
        permission: PolicyDecision,
    },
    /// Still running after the threshold; poll the task registry.
    Background {
        handle: TaskHandle,
        permission: PolicyDecision,
    },
    Denied {
        permission: PolicyDecision,
    },
    Failed {
        kind: &'static str,
        message: String,
        /// `None` when the call never reached the permission gate.
        permission: Option<PolicyDecision>,
    },
}

fn permission_block(decision: &PolicyDecision) -> Value {
    json!({
        "decision": decision.verdict(),
        "reason": decision.reason,
        "method": decision.method,
    })
}

impl ExecutionOutcome {
    #[must_use]
    pub fn permission(&self) -> Option<&PolicyDecision> {
        match self {
            Self::Completed { permission, .. }
            | Self::Background { permission, .. }
            | Self::Denied { permission } => Some(permission),
            Self::Failed { permission, .. } => permission.as_ref(),
        }
    }

    /// Function-result form handed back to the model, with `_permission` attached.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut body = match self {
            Self::Completed { value, .. } => json!({ "status": "completed", "result": value }),
            Self::Background { handle, .. } => json!({
                "status": "background",
                "task": handle,
                "message": format!(
                    "`{}` is still running in the background; poll task {} for its result",
                    handle.tool_name, handle.task_id
                ),
            }),
            Self::Denied { permission } => json!({
                "status": "denied",
                "error": format!("permission denied: {}", permission.reason),
            }),
            Self::Failed { kind, message, .. } => json!({
                "status": "failed",
                "kind": kind,
                "error": message,
            }),
        };
        if let Value::Object(map) = &mut body {
            map.insert(
                "_permission".into(),
                self.permission().map_or(Value::Null, permission_block),
            );
        }
        body
    }

    fn failed(kind: &'static str, message: impl Into<String>, permission: PolicyDecision) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
            permission: Some(permission),
        }
    }
}

struct Registered {
    plugin: Arc<dyn Plugin>,
    tool: Arc<dyn Tool>,
}

/// Dispatches tool calls through the permission gate and promotes slow
/// calls of opted-in plugins to background tasks.
pub struct ToolExecutor<C = AnyApprovalChannel> {
    gate: PermissionGate<C>,
    tools: HashMap<String, Registered>,
    tasks: TaskRegistry,
}

impl<C: std::fmt::Debug> std::fmt::Debug for ToolExecutor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolExecutor")
            .field("gate", &self.gate)
            .field("tools", &names)
            .field("tasks", &self.tasks)
            .finish()
    }
}

fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

fn failure_kind(failure: &ToolFailure) -> &'static str {
    match failure {
        ToolFailure::InvalidArguments(_) => "invalid_arguments",
        ToolFailure::Execution(_) => "tool_execution_failed",
    }
}

impl<C: ApprovalChannel> ToolExecutor<C> {
    #[must_use]
    pub fn new(gate: PermissionGate<C>, tasks: TaskRegistry) -> Self {
        Self {
            gate,
            tools: HashMap::new(),
            tasks,
        }
    }

    /// Register every tool exposed by `plugin`. A later plugin replaces an
    /// earlier tool of the same name.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        for tool in plugin.tools() {
            let name = tool.name().to_owned();
            let previous = self.tools.insert(
                name.clone(),
                Registered {
                    plugin: Arc::clone(&plugin),
                    tool,
                },
            );
            if let Some(previous) = previous {
                tracing::warn!(
                    tool = %name,
                    replaced = previous.plugin.name(),
                    by = plugin.name(),
                    "duplicate tool name"
                );
            }
        }
        tracing::debug!(plugin = plugin.name(), "plugin registered");
    }

    #[must_use]
    pub fn gate(&self) -> &PermissionGate<C> {
        &self.gate
    }

    #[must_use]
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        args: ToolArgs,
        intent: &str,
        context: &CallContext,
    ) -> ExecutionOutcome {
        let Some(entry) = self.tools.get(tool_name) else {
            tracing::warn!(tool = tool_name, "unknown tool requested");
            return ExecutionOutcome::Failed {
                kind: "unknown_tool",
                message: format!("unknown tool `{tool_name}`"),
                permission: None,
            };
        };

        let permission = self.gate.check(tool_name, &args, intent, context).await;
        if !permission.allowed {
            return ExecutionOutcome::Denied { permission };
        }

        let background = entry
            .plugin
            .background()
            .filter(|b| b.supports_background())
            .and_then(|b| {
                b.background_threshold(tool_name)
                    .map(|threshold| (threshold, b.estimated_duration(tool_name)))
            });

        match background {
            None => run_inline(&entry.tool, args, context, permission).await,
            Some((threshold, estimate)) => {
                let spec = TaskSpec::new(entry.plugin.name(), tool_name)
                    .with_estimated_duration(estimate);
                self.run_with_threshold(&entry.tool, spec, args, context, threshold, permission)
                    .await
            }
        }
    }

    async fn run_with_threshold(
        &self,
        tool: &Arc<dyn Tool>,
        spec: TaskSpec,
        args: ToolArgs,
        context: &CallContext,
        threshold: Duration,
        permission: PolicyDecision,
    ) -> ExecutionOutcome {
        let tool = Arc::clone(tool);
        let context = context.clone();
        let submitted = self.tasks.submit(spec, move |_cancel| async move {
            tool.call(args, &context).await.map_err(|e| e.to_string())
        });
        let mut ticket = match submitted {
            Ok(ticket) => ticket,
            Err(e @ TaskError::Saturated { .. }) => {
                tracing::warn!("background pool saturated: {e}");
                return ExecutionOutcome::failed("task_registry_saturated", e.to_string(), permission);
            }
            Err(e) => return ExecutionOutcome::failed("task_registry_error", e.to_string(), permission),
        };

        match tokio::time::timeout(threshold, ticket.wait()).await {
            Ok(record) => {
                self.tasks.discard(record.task_id());
                finished_outcome(record, permission)
            }
            Err(_) => {
                let handle = ticket.into_handle();
                tracing::info!(
                    task_id = %handle.task_id,
                    tool = %handle.tool_name,
                    threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX),
                    "tool call promoted to background"
                );
                ExecutionOutcome::Background { handle, permission }
            }
        }
    }

    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub fn task_status(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.tasks.status(task_id)
    }

    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub async fn task_result(
        &self,
        task_id: &str,
        wait: Option<Duration>,
    ) -> Result<TaskRecord, TaskError> {
        self.tasks.result(task_id, wait).await
    }

    /// Block until a background task finishes.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub async fn wait_for_task(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.tasks.wait_for_result(task_id).await
    }

    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub fn cancel_task(&self, task_id: &str) -> Result<CancelOutcome, TaskError> {
        self.tasks.cancel(task_id)
    }

    #[must_use]
    pub fn list_active_tasks(&self) -> Vec<TaskRecord> {
        self.tasks.list_active()
    }

    pub fn cleanup_tasks(&self, max_age: Duration) -> usize {
        self.tasks.cleanup(max_age)
    }
}

async fn run_inline(
    tool: &Arc<dyn Tool>,
    args: ToolArgs,
    context: &CallContext,
    permission: PolicyDecision,
) -> ExecutionOutcome {
    let call = AssertUnwindSafe(async { tool.call(args, context).await }).catch_unwind();
    match call.await {
        Ok(Ok(value)) => ExecutionOutcome::Completed { value, permission },
        Ok(Err(failure)) => {
            tracing::debug!(tool = tool.name(), "tool failed: {failure}");
            ExecutionOutcome::failed(failure_kind(&failure), failure.to_string(), permission)
        }
        Err(payload) => {
            let detail = panic_detail(payload.as_ref());
            tracing::error!(tool = tool.name(), "tool panicked: {detail}");
            ExecutionOutcome::failed("tool_panicked", format!("tool panicked: {detail}"), permission)
        }
    }
}

fn finished_outcome(record: TaskRecord, permission: PolicyDecision) -> ExecutionOutcome {
    match record.status {
        TaskStatus::Completed => ExecutionOutcome::Completed {
            value: record.result.unwrap_or(Value::Null),
            permission,
        },
        status => {
            let kind = match status {
                TaskStatus::TimedOut => "timed_out",
                TaskStatus::Cancelled => "cancelled",
                _ => "tool_execution_failed",
            };
            let message = record.error.unwrap_or_else(|| status.to_string());
            ExecutionOutcome::failed(kind, message, permission)
        }
    }
}
