use std::fmt;

use serde::{Deserialize, Serialize};

/// Which evaluation stage produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMethod {
    Sanitizer,
    SessionBlacklist,
    StaticBlacklist,
    SessionWhitelist,
    StaticWhitelist,
    ChannelApproved,
    ChannelDenied,
    AllowAll,
    Timeout,
    Default,
}

impl DecisionMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sanitizer => "sanitizer",
            Self::SessionBlacklist => "session_blacklist",
            Self::StaticBlacklist => "static_blacklist",
            Self::SessionWhitelist => "session_whitelist",
            Self::StaticWhitelist => "static_whitelist",
            Self::ChannelApproved => "channel_approved",
            Self::ChannelDenied => "channel_denied",
            Self::AllowAll => "allow_all",
            Self::Timeout => "timeout",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for DecisionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final allow/deny verdict for one permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
    pub method: DecisionMethod,
}

impl PolicyDecision {
    #[must_use]
    pub fn allow(reason: impl Into<String>, method: DecisionMethod) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            method,
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>, method: DecisionMethod) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            method,
        }
    }

    /// `"allow"` or `"deny"`, as rendered in result metadata.
    #[must_use]
    pub fn verdict(&self) -> &'static str {
        if self.allowed { "allow" } else { "deny" }
    }
}

/// Output of the pure policy engine. `Ask` defers to an approval channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Decided(PolicyDecision),
    Ask { reason: String },
}

impl Evaluation {
    #[must_use]
    pub fn is_ask(&self) -> bool {
        matches!(self, Self::Ask { .. })
    }

    /// The decision, if the engine reached one without a channel.
    #[must_use]
    pub fn decision(&self) -> Option<&PolicyDecision> {
        match self {
            Self::Decided(d) => Some(d),
            Self::Ask { .. } => None,
        }
    }
}
