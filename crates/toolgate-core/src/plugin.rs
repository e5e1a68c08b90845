use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use toolgate_policy::ToolArgs;

/// Failure raised by a tool body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolFailure {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Execution(String),
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolFailure>> + Send + 'static>>;

/// Per-call context, passed explicitly on every invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_tools: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CallContext {
    /// Flat key-value form used in approval requests.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// One callable operation.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Start the call. The returned future owns everything it needs so it
    /// can outlive the caller when promoted to the background.
    fn call(&self, args: ToolArgs, context: &CallContext) -> ToolFuture;
}

/// Opt-in capability: tools whose calls may be promoted to background tasks.
pub trait AutoBackground: Send + Sync {
    fn supports_background(&self) -> bool {
        true
    }

    /// How long to wait inline before handing back a task handle.
    /// `None` runs the call inline to completion.
    fn background_threshold(&self, tool: &str) -> Option<Duration>;

    fn estimated_duration(&self, _tool: &str) -> Option<Duration> {
        None
    }
}

/// A group of tools registered together.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn tools(&self) -> Vec<Arc<dyn Tool>>;

    fn background(&self) -> Option<&dyn AutoBackground> {
        None
    }
}

/// Adapter turning a closure into a `Tool`.
pub struct FnTool<F> {
    name: String,
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(ToolArgs, CallContext) -> ToolFuture + Send + Sync,
{
    #[must_use]
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Tool for FnTool<F>
where
    F: Fn(ToolArgs, CallContext) -> ToolFuture + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: ToolArgs, context: &CallContext) -> ToolFuture {
        (self.f)(args, context.clone())
    }
}
