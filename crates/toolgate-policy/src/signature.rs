use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use serde_json::Value;

/// Structured tool arguments as received from the model.
pub type ToolArgs = HashMap<String, Value>;

/// Argument carrying the command line for shell-execution tools.
pub const COMMAND_ARG: &str = "command";

/// Render an argument value the way rules see it: strings raw, everything else
/// as compact JSON.
#[must_use]
pub fn render_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

/// One tool invocation prepared for rule matching.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub tool: &'a str,
    pub args: &'a ToolArgs,
    /// Command line, when `tool` is a shell tool with a string `command`.
    pub command: Option<&'a str>,
    signature: String,
    normalized: String,
}

impl<'a> Invocation<'a> {
    #[must_use]
    pub fn new(tool: &'a str, args: &'a ToolArgs, shell_tools: &[String]) -> Self {
        let command = if shell_tools.iter().any(|t| t == tool) {
            args.get(COMMAND_ARG).and_then(Value::as_str)
        } else {
            None
        };
        let signature = match command {
            Some(cmd) => cmd.to_owned(),
            None => generic_signature(tool, args),
        };
        let normalized = signature.to_lowercase();
        Self {
            tool,
            args,
            command,
            signature,
            normalized,
        }
    }

    /// Canonical string that pattern rules are matched against.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Lowercased signature; pattern matching is case-insensitive.
    #[must_use]
    pub fn normalized_signature(&self) -> &str {
        &self.normalized
    }
}

/// `name(k1=v1, k2=v2)` with keys sorted.
#[must_use]
pub fn generic_signature(tool: &str, args: &ToolArgs) -> String {
    let sorted: BTreeMap<&str, &Value> = args.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let mut out = String::with_capacity(tool.len() + 2 + args.len() * 16);
    out.push_str(tool);
    out.push('(');
    for (i, (key, value)) in sorted.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{key}={}", render_value(value));
    }
    out.push(')');
    out
}
