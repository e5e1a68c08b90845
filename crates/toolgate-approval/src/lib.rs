//! Approval channels consulted when the policy engine returns `ask`.
//!
//! Every channel is wrapped by [`request_approval`], which bounds the wait by
//! the request's `timeout_seconds` and turns timeouts and channel errors into
//! a deny.

pub mod any;
pub mod config;
pub mod error;
pub mod file_drop;
pub mod interactive;
pub mod request;
pub mod webhook;

use std::future::Future;
use std::time::Duration;

use toolgate_policy::{DecisionMethod, PolicyDecision};

pub use any::{AnyApprovalChannel, DenyChannel};
pub use config::{ChannelConfig, ChannelKind};
pub use error::ChannelError;
pub use file_drop::FileDropChannel;
pub use interactive::{DialoguerPrompter, InteractiveChannel, InteractiveChoice, Prompter};
pub use request::{ApprovalOutcome, ApprovalRequest, ApprovalResponse, Decision, RememberScope};
pub use webhook::WebhookChannel;

/// A source of allow/deny answers for `ask` decisions.
pub trait ApprovalChannel: Send + Sync {
    /// Ask for a verdict on one request. Implementations may wait without
    /// bound; the caller applies the timeout.
    fn request(
        &self,
        request: &ApprovalRequest,
    ) -> impl Future<Output = Result<ApprovalOutcome, ChannelError>> + Send;
}

/// Resolved answer: the final decision plus what to remember for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub decision: PolicyDecision,
    pub remember: Option<RememberScope>,
    pub remember_pattern: Option<String>,
}

impl Approval {
    fn timed_out(reason: String) -> Self {
        Self {
            decision: PolicyDecision::deny(reason, DecisionMethod::Timeout),
            remember: None,
            remember_pattern: None,
        }
    }
}

/// Ask `channel` about `request`, denying on timeout or channel failure.
pub async fn request_approval<C: ApprovalChannel>(
    channel: &C,
    request: &ApprovalRequest,
) -> Approval {
    let limit = Duration::from_secs(request.timeout_seconds());
    match tokio::time::timeout(limit, channel.request(request)).await {
        Ok(Ok(outcome)) => {
            let (method, verdict) = match outcome.decision {
                Decision::Allow => (DecisionMethod::ChannelApproved, "approved"),
                Decision::Deny => (DecisionMethod::ChannelDenied, "denied"),
            };
            let reason = outcome
                .reason
                .unwrap_or_else(|| format!("{verdict} via approval channel"));
            let decision = match outcome.decision {
                Decision::Allow => PolicyDecision::allow(reason, method),
                Decision::Deny => PolicyDecision::deny(reason, method),
            };
            Approval {
                decision,
                remember: outcome.remember,
                remember_pattern: outcome.remember_pattern,
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(
                tool = request.tool_name(),
                request_id = %request.request_id(),
                "approval channel failed: {e}"
            );
            Approval::timed_out(format!("approval channel unavailable: {e}"))
        }
        Err(_) => {
            tracing::warn!(
                tool = request.tool_name(),
                request_id = %request.request_id(),
                timeout_secs = request.timeout_seconds(),
                "approval timed out"
            );
            Approval::timed_out(format!(
                "no approval within {}s; denied by default",
                request.timeout_seconds()
            ))
        }
    }
}
