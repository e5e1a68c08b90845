use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use glob::Pattern;

use crate::config::PolicyListConfig;
use crate::error::PolicyError;
use crate::signature::{Invocation, render_value};

/// How argument-rule prefixes are compared against argument values.
///
/// Blacklists use `Anywhere`, whitelists use `Leading`: a deny rule should
/// catch `env sudo ls`, an allow rule must not be satisfied by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentMatch {
    /// Value starts with the prefix.
    Leading,
    /// Value starts with or contains the prefix.
    Anywhere,
}

/// The rule inside a list that matched an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatch {
    Name(String),
    Pattern(String),
    Argument { key: String, prefix: String },
}

impl fmt::Display for RuleMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name rule `{name}`"),
            Self::Pattern(pattern) => write!(f, "pattern rule `{pattern}`"),
            Self::Argument { key, prefix } => write!(f, "argument rule `{key}` ~ `{prefix}`"),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    pattern: Pattern,
}

/// A blacklist or whitelist: name rules, pattern rules and argument rules.
///
/// Within a list the rule types are consulted in that order and the first
/// match wins.
#[derive(Debug, Clone, Default)]
pub struct PolicyList {
    tools: BTreeSet<String>,
    patterns: Vec<CompiledPattern>,
    arguments: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PolicyList {
    /// Compile a list from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidPattern` if any glob fails to compile.
    pub fn from_config(config: &PolicyListConfig) -> Result<Self, PolicyError> {
        let mut list = Self::default();
        for tool in &config.tools {
            list.add_tool(tool);
        }
        for pattern in &config.patterns {
            list.add_pattern(pattern)?;
        }
        for (tool, keys) in &config.arguments {
            for (key, prefixes) in keys {
                for prefix in prefixes {
                    list.add_argument(tool, key, prefix);
                }
            }
        }
        Ok(list)
    }

    pub fn add_tool(&mut self, tool: &str) {
        self.tools.insert(tool.to_owned());
    }

    /// Add a glob pattern rule. Patterns are matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidPattern` if the glob fails to compile.
    pub fn add_pattern(&mut self, pattern: &str) -> Result<(), PolicyError> {
        if self.patterns.iter().any(|p| p.source == pattern) {
            return Ok(());
        }
        let compiled =
            Pattern::new(&pattern.to_lowercase()).map_err(|source| PolicyError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })?;
        self.patterns.push(CompiledPattern {
            source: pattern.to_owned(),
            pattern: compiled,
        });
        Ok(())
    }

    pub fn add_argument(&mut self, tool: &str, key: &str, prefix: &str) {
        if prefix.is_empty() {
            return;
        }
        let prefixes = self
            .arguments
            .entry(tool.to_owned())
            .or_default()
            .entry(key.to_owned())
            .or_default();
        if !prefixes.iter().any(|p| p == prefix) {
            prefixes.push(prefix.to_owned());
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.patterns.is_empty() && self.arguments.is_empty()
    }

    /// Find the first rule matching `invocation`: name, then pattern, then argument.
    #[must_use]
    pub fn find_match(&self, invocation: &Invocation<'_>, mode: ArgumentMatch) -> Option<RuleMatch> {
        if self.tools.contains(invocation.tool) {
            return Some(RuleMatch::Name(invocation.tool.to_owned()));
        }

        let signature = invocation.normalized_signature();
        if let Some(p) = self.patterns.iter().find(|p| p.pattern.matches(signature)) {
            return Some(RuleMatch::Pattern(p.source.clone()));
        }

        let by_key = self.arguments.get(invocation.tool)?;
        for (key, prefixes) in by_key {
            let Some(value) = invocation.args.get(key) else {
                continue;
            };
            let rendered = render_value(value).to_lowercase();
            if let Some(prefix) = prefixes
                .iter()
                .find(|p| matches_argument(&rendered, &p.to_lowercase(), mode))
            {
                return Some(RuleMatch::Argument {
                    key: key.clone(),
                    prefix: prefix.clone(),
                });
            }
        }
        None
    }

    /// Human-readable listing, one rule per line.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.tools.iter().map(|t| format!("tool {t}")).collect();
        lines.extend(self.patterns.iter().map(|p| format!("pattern {}", p.source)));
        for (tool, keys) in &self.arguments {
            for (key, prefixes) in keys {
                for prefix in prefixes {
                    lines.push(format!("argument {tool}.{key} ~ {prefix}"));
                }
            }
        }
        lines
    }
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn ends_at_boundary(value: &str, end: usize) -> bool {
    value[end..].chars().next().is_none_or(|c| !is_token_char(c))
}

fn starts_at_boundary(value: &str, start: usize) -> bool {
    value[..start].chars().next_back().is_none_or(|c| !is_token_char(c))
}

/// Compare one argument value against one rule prefix.
///
/// A prefix that ends in an alphanumeric character only matches a whole
/// token, so `sudo` matches `sudo apt` but not `sudoku`. Prefixes ending in a
/// separator such as `/etc/` match as plain prefixes.
#[must_use]
pub fn matches_argument(value: &str, prefix: &str, mode: ArgumentMatch) -> bool {
    if prefix.is_empty() {
        return false;
    }
    let check_end = prefix.chars().next_back().is_some_and(char::is_alphanumeric);
    let check_start = prefix.chars().next().is_some_and(char::is_alphanumeric);

    match mode {
        ArgumentMatch::Leading => {
            value.starts_with(prefix) && (!check_end || ends_at_boundary(value, prefix.len()))
        }
        ArgumentMatch::Anywhere => value.match_indices(prefix).any(|(idx, _)| {
            (!check_start || starts_at_boundary(value, idx))
                && (!check_end || ends_at_boundary(value, idx + prefix.len()))
        }),
    }
}
