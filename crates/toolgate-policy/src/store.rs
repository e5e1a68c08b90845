use std::fmt::Write;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::config::{DefaultPolicy, PolicyConfig};
use crate::error::PolicyError;
use crate::rules::PolicyList;
use crate::sanitizer::Sanitizer;

/// Rules compiled from configuration. Replaced wholesale on reload, never mutated.
#[derive(Debug, Clone)]
pub struct StaticPolicy {
    pub default_policy: DefaultPolicy,
    pub shell_tools: Vec<String>,
    pub blacklist: PolicyList,
    pub whitelist: PolicyList,
    pub sanitizer: Sanitizer,
}

impl StaticPolicy {
    /// Compile the policy section of a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidPattern` if any list contains a bad glob.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        Ok(Self {
            default_policy: config.default_policy,
            shell_tools: config.shell_tools.clone(),
            blacklist: PolicyList::from_config(&config.blacklist)?,
            whitelist: PolicyList::from_config(&config.whitelist)?,
            sanitizer: Sanitizer::new(&config.sanitization),
        })
    }
}

impl Default for StaticPolicy {
    fn default() -> Self {
        let config = PolicyConfig::default();
        Self {
            default_policy: config.default_policy,
            shell_tools: config.shell_tools,
            blacklist: PolicyList::default(),
            whitelist: PolicyList::default(),
            sanitizer: Sanitizer::new(&config.sanitization),
        }
    }
}

/// Runtime overlay built from approval responses. Lives for one process.
#[derive(Debug, Clone, Default)]
pub struct SessionRules {
    pub blacklist: PolicyList,
    pub whitelist: PolicyList,
    pub allow_all: bool,
}

/// A rule remembered for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRule {
    Tool(String),
    Pattern(String),
}

/// Operator command that edits the session overlay.
///
/// Parsed from text of the form `/session <subcommand> [arg]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    AllowTool(String),
    DenyTool(String),
    AllowPattern(String),
    DenyPattern(String),
    AllowAll,
    Clear,
    List,
}

impl SessionCommand {
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidSessionCommand` for unknown subcommands
    /// or a missing argument.
    pub fn parse(input: &str) -> Result<Self, PolicyError> {
        let invalid = PolicyError::InvalidSessionCommand;

        let rest = input
            .trim()
            .strip_prefix("/session")
            .ok_or_else(|| invalid("expected `/session <subcommand>`".into()))?;
        let rest = rest.trim();
        let (sub, arg) = match rest.split_once(char::is_whitespace) {
            Some((sub, arg)) => (sub, arg.trim()),
            None => (rest, ""),
        };
        let required = |name: &str| {
            if arg.is_empty() {
                Err(invalid(format!("`{name}` requires an argument")))
            } else {
                Ok(arg.to_owned())
            }
        };

        match sub {
            "allow-tool" => required(sub).map(Self::AllowTool),
            "deny-tool" => required(sub).map(Self::DenyTool),
            "allow-pattern" => required(sub).map(Self::AllowPattern),
            "deny-pattern" => required(sub).map(Self::DenyPattern),
            "allow-all" => Ok(Self::AllowAll),
            "clear" => Ok(Self::Clear),
            "list" | "" => Ok(Self::List),
            other => Err(invalid(format!("unknown subcommand `{other}`"))),
        }
    }
}

/// Static snapshot plus session overlay, shared by every policy check.
#[derive(Debug, Default)]
pub struct PolicyStore {
    static_policy: RwLock<Arc<StaticPolicy>>,
    session: RwLock<SessionRules>,
}

impl PolicyStore {
    #[must_use]
    pub fn new(static_policy: StaticPolicy) -> Self {
        Self {
            static_policy: RwLock::new(Arc::new(static_policy)),
            session: RwLock::new(SessionRules::default()),
        }
    }

    /// # Errors
    ///
    /// Returns `PolicyError::InvalidPattern` if the configuration has a bad glob.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        StaticPolicy::from_config(config).map(Self::new)
    }

    /// Current static rules. Checks hold the `Arc` so a concurrent reload
    /// never changes rules mid-evaluation.
    #[must_use]
    pub fn snapshot(&self) -> Arc<StaticPolicy> {
        Arc::clone(
            &self
                .static_policy
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Swap in new static rules. The session overlay is kept.
    pub fn replace_static(&self, policy: StaticPolicy) {
        *self
            .static_policy
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
        tracing::info!("static policy replaced");
    }

    pub fn session(&self) -> RwLockReadGuard<'_, SessionRules> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_session<T>(&self, f: impl FnOnce(&mut SessionRules) -> T) -> T {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// # Errors
    ///
    /// Returns `PolicyError::InvalidPattern` for a bad glob.
    pub fn remember_allow(&self, rule: &SessionRule) -> Result<(), PolicyError> {
        tracing::debug!(?rule, "session whitelist updated");
        self.update_session(|s| add_rule(&mut s.whitelist, rule))
    }

    /// # Errors
    ///
    /// Returns `PolicyError::InvalidPattern` for a bad glob.
    pub fn remember_deny(&self, rule: &SessionRule) -> Result<(), PolicyError> {
        tracing::debug!(?rule, "session blacklist updated");
        self.update_session(|s| add_rule(&mut s.blacklist, rule))
    }

    pub fn allow_all_remaining(&self) {
        tracing::debug!("session allow-all enabled");
        self.update_session(|s| s.allow_all = true);
    }

    /// Drop every session rule, leaving static behaviour only.
    pub fn clear_session(&self) {
        self.update_session(|s| *s = SessionRules::default());
        tracing::debug!("session rules cleared");
    }

    /// Apply an operator command and return a short confirmation.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidPattern` when a pattern command carries a bad glob.
    pub fn apply(&self, command: SessionCommand) -> Result<String, PolicyError> {
        match command {
            SessionCommand::AllowTool(tool) => {
                self.remember_allow(&SessionRule::Tool(tool.clone()))?;
                Ok(format!("tool `{tool}` allowed for this session"))
            }
            SessionCommand::DenyTool(tool) => {
                self.remember_deny(&SessionRule::Tool(tool.clone()))?;
                Ok(format!("tool `{tool}` denied for this session"))
            }
            SessionCommand::AllowPattern(pattern) => {
                self.remember_allow(&SessionRule::Pattern(pattern.clone()))?;
                Ok(format!("pattern `{pattern}` allowed for this session"))
            }
            SessionCommand::DenyPattern(pattern) => {
                self.remember_deny(&SessionRule::Pattern(pattern.clone()))?;
                Ok(format!("pattern `{pattern}` denied for this session"))
            }
            SessionCommand::AllowAll => {
                self.allow_all_remaining();
                Ok("all remaining tool calls allowed for this session".into())
            }
            SessionCommand::Clear => {
                self.clear_session();
                Ok("session rules cleared".into())
            }
            SessionCommand::List => Ok(self.describe_session()),
        }
    }

    fn describe_session(&self) -> String {
        let session = self.session();
        if session.blacklist.is_empty() && session.whitelist.is_empty() && !session.allow_all {
            return "no session rules".into();
        }
        let mut out = String::new();
        for line in session.blacklist.describe() {
            let _ = writeln!(out, "deny  {line}");
        }
        for line in session.whitelist.describe() {
            let _ = writeln!(out, "allow {line}");
        }
        if session.allow_all {
            out.push_str("allow all remaining\n");
        }
        out
    }
}

fn add_rule(list: &mut PolicyList, rule: &SessionRule) -> Result<(), PolicyError> {
    match rule {
        SessionRule::Tool(tool) => {
            list.add_tool(tool);
            Ok(())
        }
        SessionRule::Pattern(pattern) => list.add_pattern(pattern),
    }
}
