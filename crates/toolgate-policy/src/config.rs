use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_shell_tools() -> Vec<String> {
    ["bash", "shell", "shell_tool", "execute_command"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_path_arguments() -> Vec<String> {
    [
        "path",
        "file",
        "file_path",
        "filename",
        "directory",
        "dir",
        "cwd",
        "target",
        "source",
        "destination",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// What to do when no blacklist or whitelist rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    Allow,
    Deny,
    #[default]
    Ask,
}

/// Policy section of the configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    #[serde(default, alias = "defaultPolicy")]
    pub default_policy: DefaultPolicy,
    /// Tools whose `command` argument is treated as a shell command line.
    #[serde(default = "default_shell_tools", alias = "shellTools")]
    pub shell_tools: Vec<String>,
    #[serde(default)]
    pub blacklist: PolicyListConfig,
    #[serde(default)]
    pub whitelist: PolicyListConfig,
    #[serde(default)]
    pub sanitization: SanitizationConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_policy: DefaultPolicy::default(),
            shell_tools: default_shell_tools(),
            blacklist: PolicyListConfig::default(),
            whitelist: PolicyListConfig::default(),
            sanitization: SanitizationConfig::default(),
        }
    }
}

/// Blacklist or whitelist as written in configuration.
///
/// `arguments` maps tool name → argument key → value prefixes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyListConfig {
    pub tools: Vec<String>,
    pub patterns: Vec<String>,
    pub arguments: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PolicyListConfig {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.patterns.is_empty() && self.arguments.is_empty()
    }
}

/// Injection and path-scope checks applied before any rule lookup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SanitizationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub block_shell_metacharacters: bool,
    #[serde(default)]
    pub block_dangerous_commands: bool,
    #[serde(default)]
    pub allowed_dangerous_commands: Vec<String>,
    #[serde(default)]
    pub custom_blocked_commands: Vec<String>,
    /// Argument keys whose values are checked as filesystem paths.
    #[serde(default = "default_path_arguments")]
    pub path_arguments: Vec<String>,
    #[serde(default)]
    pub path_scope: PathScopeConfig,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_shell_metacharacters: true,
            block_dangerous_commands: false,
            allowed_dangerous_commands: Vec::new(),
            custom_blocked_commands: Vec::new(),
            path_arguments: default_path_arguments(),
            path_scope: PathScopeConfig::default(),
        }
    }
}

/// Filesystem scope for path-like arguments.
///
/// An empty `allowed_roots` means the process working directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathScopeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
    #[serde(default)]
    pub block_absolute: bool,
    #[serde(default = "default_true")]
    pub block_parent_traversal: bool,
    #[serde(default)]
    pub allow_home: bool,
}

impl Default for PathScopeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_roots: Vec::new(),
            block_absolute: false,
            block_parent_traversal: true,
            allow_home: false,
        }
    }
}
