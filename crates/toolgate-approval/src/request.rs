use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Verdict returned by an approval channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// Where a remembered answer is stored for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RememberScope {
    SessionWhitelist,
    SessionBlacklist,
    SessionAllowAll,
}

/// Question sent to an approval channel when the policy engine says `ask`.
///
/// Serializes to the webhook and file-drop wire format. Fields are read-only
/// once built; `default_on_timeout` is always `deny`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    request_id: Uuid,
    timestamp: DateTime<Utc>,
    tool_name: String,
    arguments: Map<String, Value>,
    intent: String,
    timeout_seconds: u64,
    default_on_timeout: Decision,
    context: Map<String, Value>,
}

impl ApprovalRequest {
    #[must_use]
    pub fn new(
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
        intent: impl Into<String>,
        context: Map<String, Value>,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            tool_name: tool_name.into(),
            arguments,
            intent: intent.into(),
            timeout_seconds,
            default_on_timeout: Decision::Deny,
            context,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    #[must_use]
    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    #[must_use]
    pub fn intent(&self) -> &str {
        &self.intent
    }

    #[must_use]
    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    #[must_use]
    pub fn default_on_timeout(&self) -> Decision {
        self.default_on_timeout
    }
}

/// Response body accepted from webhook and file-drop peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub request_id: Uuid,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub remember: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remember_pattern: Option<String>,
}

/// What a channel answered, before it is turned into a policy decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub decision: Decision,
    pub remember: Option<RememberScope>,
    pub reason: Option<String>,
    pub remember_pattern: Option<String>,
}

impl ApprovalOutcome {
    #[must_use]
    pub fn allow_once() -> Self {
        Self {
            decision: Decision::Allow,
            remember: None,
            reason: None,
            remember_pattern: None,
        }
    }

    #[must_use]
    pub fn deny_once() -> Self {
        Self {
            decision: Decision::Deny,
            ..Self::allow_once()
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn remembered(mut self, scope: RememberScope) -> Self {
        self.remember = Some(scope);
        self
    }
}

impl From<ApprovalResponse> for ApprovalOutcome {
    fn from(response: ApprovalResponse) -> Self {
        let remember = response.remember.then_some(match response.decision {
            Decision::Allow => RememberScope::SessionWhitelist,
            Decision::Deny => RememberScope::SessionBlacklist,
        });
        Self {
            decision: response.decision,
            remember,
            reason: response.reason,
            remember_pattern: response.remember_pattern,
        }
    }
}
