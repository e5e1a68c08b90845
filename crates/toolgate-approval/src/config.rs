use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

fn default_timeout() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Which approval channel answers `ask` decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    #[serde(alias = "interactive")]
    Console,
    Webhook,
    File,
    /// Headless: every `ask` is denied.
    Deny,
}

impl ChannelKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Webhook => "webhook",
            Self::File => "file",
            Self::Deny => "deny",
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" | "interactive" => Ok(Self::Console),
            "webhook" => Ok(Self::Webhook),
            "file" => Ok(Self::File),
            "deny" => Ok(Self::Deny),
            other => Err(ChannelError::Config(format!(
                "unknown channel type `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    #[serde(default, rename = "type")]
    pub kind: ChannelKind,
    /// Seconds to wait for an answer before denying.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token sent with webhook requests.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::default(),
            timeout: default_timeout(),
            endpoint: None,
            token: None,
            base_path: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// # Errors
    ///
    /// Returns `ChannelError::Config` when the selected channel is missing a
    /// required field or a timing value is zero.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.timeout == 0 {
            return Err(ChannelError::Config("channel timeout must be > 0".into()));
        }
        match self.kind {
            ChannelKind::Webhook
                if self.endpoint.as_deref().is_none_or(|e| e.trim().is_empty()) =>
            {
                Err(ChannelError::Config(
                    "webhook channel requires `endpoint`".into(),
                ))
            }
            ChannelKind::File if self.base_path.is_none() => Err(ChannelError::Config(
                "file channel requires `base_path`".into(),
            )),
            ChannelKind::File if self.poll_interval_ms == 0 => Err(ChannelError::Config(
                "poll_interval_ms must be > 0".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: ChannelConfig = toml::from_str("").unwrap();
        assert_eq!(config.kind, ChannelKind::Console);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn interactive_is_alias_for_console() {
        let config: ChannelConfig = toml::from_str(r#"type = "interactive""#).unwrap();
        assert_eq!(config.kind, ChannelKind::Console);
        assert_eq!("interactive".parse::<ChannelKind>().unwrap(), ChannelKind::Console);
    }

    #[test]
    fn webhook_section() {
        let config: ChannelConfig = toml::from_str(
            r#"
            type = "webhook"
            timeout = 10
            endpoint = "https://approvals.example/hook"
            token = "secret"
        "#,
        )
        .unwrap();
        assert_eq!(config.kind, ChannelKind::Webhook);
        assert_eq!(config.timeout, 10);
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn webhook_without_endpoint_is_invalid() {
        let config = ChannelConfig {
            kind: ChannelKind::Webhook,
            ..ChannelConfig::default()
        };
        assert!(matches!(config.validate(), Err(ChannelError::Config(_))));
    }

    #[test]
    fn file_without_base_path_is_invalid() {
        let config = ChannelConfig {
            kind: ChannelKind::File,
            ..ChannelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let config = ChannelConfig {
            timeout: 0,
            ..ChannelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!("carrier-pigeon".parse::<ChannelKind>().is_err());
        assert!(toml::from_str::<ChannelConfig>(r#"type = "pigeon""#).is_err());
    }
}
