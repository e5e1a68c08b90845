//! Shell-injection and path-scope checks run before any rule lookup.
//!
//! These checks are lexical. Symlinks, races between check and use, and
//! encoded paths can get past them; they are a first line of defense and must
//! be paired with OS-level isolation.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::config::SanitizationConfig;
use crate::signature::Invocation;

const SHELL_METACHARACTERS: &[(&str, &str)] = &[
    (";", "command separator"),
    ("|", "pipe"),
    ("&", "background or logical operator"),
    ("`", "backtick substitution"),
    ("$(", "command substitution"),
    ("${", "parameter expansion"),
    (">", "output redirection"),
    ("<", "input redirection"),
    ("\n", "newline"),
    ("\r", "carriage return"),
];

const PRIVILEGE_ESCALATION: &[&str] = &["sudo", "su", "doas", "pkexec"];
const DESTRUCTIVE_FILESYSTEM: &[&str] = &[
    "rm", "rmdir", "shred", "mkfs", "dd", "wipefs", "fdisk", "parted",
];
const OUTBOUND_NETWORK: &[&str] = &[
    "curl", "wget", "nc", "ncat", "netcat", "ssh", "scp", "sftp", "telnet", "ftp", "rsync",
    "socat",
];
const PROCESS_CONTROL: &[&str] = &[
    "kill", "killall", "pkill", "chmod", "chown", "chgrp", "shutdown", "reboot", "halt",
    "poweroff", "systemctl", "crontab",
];

/// Programs that run another program given as a later argument.
const COMMAND_WRAPPERS: &[&str] = &[
    "env", "nohup", "nice", "timeout", "xargs", "exec", "command", "time", "builtin", "stdbuf",
];

const SEGMENT_SEPARATORS: &[char] = &[';', '|', '&', '\n', '\r', '(', ')', '`'];

/// Why the sanitizer refused an invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("shell metacharacter {token:?} ({description}) in command")]
    ShellMetacharacter {
        token: &'static str,
        description: &'static str,
    },

    #[error("dangerous command `{command}` ({category})")]
    DangerousCommand {
        command: String,
        category: &'static str,
    },

    #[error("blocked command `{command}`")]
    CustomBlocked { command: String },

    #[error("parent-directory traversal in path `{path}`")]
    ParentTraversal { path: String },

    #[error("home-directory reference in path `{path}`")]
    HomeReference { path: String },

    #[error("absolute path `{path}` is not allowed")]
    AbsolutePath { path: String },

    #[error("path `{path}` resolves outside the allowed roots")]
    OutOfScope { path: String },
}

#[derive(Debug, Clone)]
struct PathScope {
    roots: Vec<PathBuf>,
    block_absolute: bool,
    block_parent_traversal: bool,
    home: Option<PathBuf>,
}

/// Stateless validator built from `SanitizationConfig`.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    enabled: bool,
    block_metacharacters: bool,
    block_dangerous: bool,
    dangerous: HashMap<String, &'static str>,
    custom_words: HashSet<String>,
    custom_phrases: Vec<String>,
    path_arguments: HashSet<String>,
    path_scope: Option<PathScope>,
}

impl Sanitizer {
    #[must_use]
    pub fn new(config: &SanitizationConfig) -> Self {
        let allowed: HashSet<String> = config
            .allowed_dangerous_commands
            .iter()
            .map(|s| s.trim().to_lowercase())
            .collect();

        let mut dangerous = HashMap::new();
        for (category, commands) in [
            ("privilege escalation", PRIVILEGE_ESCALATION),
            ("destructive filesystem operation", DESTRUCTIVE_FILESYSTEM),
            ("outbound network tool", OUTBOUND_NETWORK),
            ("process or permission control", PROCESS_CONTROL),
        ] {
            for cmd in commands {
                if !allowed.contains(*cmd) {
                    dangerous.insert((*cmd).to_owned(), category);
                }
            }
        }

        let mut custom_words = HashSet::new();
        let mut custom_phrases = Vec::new();
        for entry in &config.custom_blocked_commands {
            let entry = entry.trim().to_lowercase();
            if entry.is_empty() {
                continue;
            }
            if entry.contains(char::is_whitespace) {
                custom_phrases.push(entry);
            } else {
                custom_words.insert(entry);
            }
        }

        let scope = &config.path_scope;
        let path_scope = scope.enabled.then(|| {
            let roots = if scope.allowed_roots.is_empty() {
                vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))]
            } else {
                scope.allowed_roots.clone()
            };
            PathScope {
                roots: roots.iter().map(|r| normalize(r)).collect(),
                block_absolute: scope.block_absolute,
                block_parent_traversal: scope.block_parent_traversal,
                home: if scope.allow_home {
                    dirs::home_dir().map(|h| normalize(&h))
                } else {
                    None
                },
            }
        });

        Self {
            enabled: config.enabled,
            block_metacharacters: config.block_shell_metacharacters,
            block_dangerous: config.block_dangerous_commands,
            dangerous,
            custom_words,
            custom_phrases,
            path_arguments: config.path_arguments.iter().cloned().collect(),
            path_scope,
        }
    }

    /// A sanitizer that accepts everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(&SanitizationConfig {
            enabled: false,
            ..SanitizationConfig::default()
        })
    }

    /// Run every enabled check against one invocation.
    ///
    /// # Errors
    ///
    /// Returns the first `Rejection` found. Arguments are visited in key order
    /// so the reported rejection is stable.
    pub fn sanitize(&self, invocation: &Invocation<'_>) -> Result<(), Rejection> {
        if !self.enabled {
            return Ok(());
        }

        if let Some(command) = invocation.command {
            self.check_command(command)?;
            if self.path_scope.is_some() {
                for token in path_like_tokens(command) {
                    self.check_path(token)?;
                }
            }
        }

        if self.path_scope.is_some() {
            let mut keys: Vec<&String> = invocation
                .args
                .keys()
                .filter(|k| self.path_arguments.contains(k.as_str()))
                .collect();
            keys.sort();
            for key in keys {
                match &invocation.args[key] {
                    Value::String(s) => self.check_path(s)?,
                    Value::Array(items) => {
                        for s in items.iter().filter_map(Value::as_str) {
                            self.check_path(s)?;
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Injection and dangerous-command checks for one command line.
    ///
    /// # Errors
    ///
    /// Returns a `Rejection` describing the first offending token.
    pub fn check_command(&self, command: &str) -> Result<(), Rejection> {
        if self.block_metacharacters {
            for &(token, description) in SHELL_METACHARACTERS {
                if command.contains(token) {
                    return Err(Rejection::ShellMetacharacter { token, description });
                }
            }
        }

        let lower = command.to_lowercase();
        if let Some(phrase) = self.custom_phrases.iter().find(|p| lower.contains(p.as_str())) {
            return Err(Rejection::CustomBlocked {
                command: phrase.clone(),
            });
        }

        for word in command_words(&lower) {
            let base = word.rsplit('/').next().unwrap_or(word);
            if self.custom_words.contains(base) {
                return Err(Rejection::CustomBlocked {
                    command: base.to_owned(),
                });
            }
            if self.block_dangerous
                && let Some(category) = self.dangerous_category(base)
            {
                return Err(Rejection::DangerousCommand {
                    command: base.to_owned(),
                    category,
                });
            }
        }
        Ok(())
    }

    fn dangerous_category(&self, base: &str) -> Option<&'static str> {
        if let Some(category) = self.dangerous.get(base) {
            return Some(*category);
        }
        // mkfs.ext4, mkfs.vfat, ...
        match base.split_once('.') {
            Some(("mkfs", _)) => self.dangerous.get("mkfs").copied(),
            _ => None,
        }
    }

    /// Path-scope check for one path-like string. No-op when scope is disabled.
    ///
    /// # Errors
    ///
    /// Returns a `Rejection` when the path escapes the configured scope.
    pub fn check_path(&self, raw: &str) -> Result<(), Rejection> {
        let Some(scope) = &self.path_scope else {
            return Ok(());
        };
        let trimmed = raw.trim().trim_matches(['"', '\'']);
        if trimmed.is_empty() {
            return Ok(());
        }
        let reject_home = || Rejection::HomeReference {
            path: trimmed.to_owned(),
        };

        let path = Path::new(trimmed);
        if scope.block_parent_traversal && path.components().any(|c| c == Component::ParentDir) {
            return Err(Rejection::ParentTraversal {
                path: trimmed.to_owned(),
            });
        }

        if let Some(rest) = trimmed.strip_prefix('~') {
            // `~user/...` cannot be expanded lexically.
            if !(rest.is_empty() || rest.starts_with('/')) {
                return Err(reject_home());
            }
            let home = scope.home.as_ref().ok_or_else(reject_home)?;
            let resolved = normalize(&home.join(rest.trim_start_matches('/')));
            return if resolved.starts_with(home) {
                Ok(())
            } else {
                Err(Rejection::OutOfScope {
                    path: trimmed.to_owned(),
                })
            };
        }

        if path.is_absolute() && scope.block_absolute {
            return Err(Rejection::AbsolutePath {
                path: trimmed.to_owned(),
            });
        }

        let resolved = if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&scope.roots[0].join(path))
        };
        let in_scope = scope
            .roots
            .iter()
            .chain(scope.home.iter())
            .any(|root| resolved.starts_with(root));
        if in_scope {
            Ok(())
        } else {
            Err(Rejection::OutOfScope {
                path: trimmed.to_owned(),
            })
        }
    }
}

/// Lexical normalization: drops `.` and folds `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn is_assignment(token: &str) -> bool {
    token.split_once('=').is_some_and(|(name, _)| {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn is_wrapper_operand(token: &str) -> bool {
    let duration = token.trim_end_matches(['s', 'm', 'h', 'd']);
    token.starts_with('-')
        || is_assignment(token)
        || (duration.starts_with(|c: char| c.is_ascii_digit())
            && duration.chars().all(|c| c.is_ascii_digit() || c == '.'))
}

/// Executables in command position, one or more per separator-delimited segment.
fn command_words(command: &str) -> Vec<&str> {
    let mut words = Vec::new();
    for segment in command.split(SEGMENT_SEPARATORS) {
        let mut tokens = segment
            .split_whitespace()
            .map(|t| t.trim_matches(['"', '\'', '{', '}']))
            .filter(|t| !t.is_empty())
            .skip_while(|t| is_assignment(t));

        let Some(mut word) = tokens.next() else {
            continue;
        };
        words.push(word);
        while COMMAND_WRAPPERS.contains(&word.rsplit('/').next().unwrap_or(word)) {
            let Some(next) = tokens.by_ref().find(|t| !is_wrapper_operand(t)) else {
                break;
            };
            word = next;
            words.push(word);
        }
    }
    words
}

/// Tokens of a command line that look like filesystem paths.
fn path_like_tokens(command: &str) -> Vec<&str> {
    command
        .split(|c: char| c.is_whitespace() || SEGMENT_SEPARATORS.contains(&c))
        .map(|t| t.trim_matches(['"', '\'']))
        .map(|t| t.rsplit_once('=').map_or(t, |(_, value)| value))
        .filter(|t| {
            t.starts_with('/')
                || t.starts_with('~')
                || t.starts_with("./")
                || t.starts_with("../")
                || *t == ".."
                || t.contains("/../")
                || t.ends_with("/..")
        })
        .collect()
}
