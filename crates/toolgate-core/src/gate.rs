use std::sync::Arc;

use serde_json::Map;
use toolgate_approval::{
    AnyApprovalChannel, ApprovalChannel, ApprovalRequest, RememberScope, request_approval,
};
use toolgate_policy::{
    Evaluation, PolicyDecision, PolicyEngine, PolicyError, PolicyStore, SessionCommand,
    SessionRule, ToolArgs,
};

use crate::audit::{AuditEvent, AuditLogger};
use crate::plugin::CallContext;

/// Standalone permission check: engine, approval channel, session memory and audit.
#[derive(Debug)]
pub struct PermissionGate<C = AnyApprovalChannel> {
    engine: PolicyEngine,
    channel: C,
    approval_timeout_secs: u64,
    audit: Option<Arc<AuditLogger>>,
}

impl<C: ApprovalChannel> PermissionGate<C> {
    #[must_use]
    pub fn new(store: Arc<PolicyStore>, channel: C, approval_timeout_secs: u64) -> Self {
        Self {
            engine: PolicyEngine::new(store),
            channel,
            approval_timeout_secs,
            audit: None,
        }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<PolicyStore> {
        self.engine.store()
    }

    #[must_use]
    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// Decide whether `tool` may run with `args`, asking the approval
    /// channel when the policy has no answer.
    pub async fn check(
        &self,
        tool: &str,
        args: &ToolArgs,
        intent: &str,
        context: &CallContext,
    ) -> PolicyDecision {
        let decision = match self.engine.evaluate(tool, args) {
            Evaluation::Decided(decision) => decision,
            Evaluation::Ask { reason } => {
                tracing::debug!(tool, %reason, "asking approval channel");
                self.ask(tool, args, intent, context).await
            }
        };

        if decision.allowed {
            tracing::debug!(tool, method = %decision.method, "tool call allowed");
        } else {
            tracing::info!(tool, method = %decision.method, reason = %decision.reason, "tool call denied");
        }
        if let Some(audit) = &self.audit {
            audit.log(&AuditEvent::check(tool, args, &decision)).await;
        }
        decision
    }

    async fn ask(
        &self,
        tool: &str,
        args: &ToolArgs,
        intent: &str,
        context: &CallContext,
    ) -> PolicyDecision {
        let arguments: Map<_, _> = args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let request = ApprovalRequest::new(
            tool,
            arguments,
            intent,
            context.to_map(),
            self.approval_timeout_secs,
        );
        let approval = request_approval(&self.channel, &request).await;

        if let Some(scope) = approval.remember
            && let Err(e) = self.remember(tool, scope, approval.remember_pattern.as_deref())
        {
            tracing::warn!(tool, "could not remember approval answer: {e}");
        }
        approval.decision
    }

    fn remember(
        &self,
        tool: &str,
        scope: RememberScope,
        pattern: Option<&str>,
    ) -> Result<(), PolicyError> {
        let rule = match pattern {
            Some(p) if !p.trim().is_empty() => SessionRule::Pattern(p.to_owned()),
            _ => SessionRule::Tool(tool.to_owned()),
        };
        let store = self.store();
        match scope {
            RememberScope::SessionWhitelist => store.remember_allow(&rule),
            RememberScope::SessionBlacklist => store.remember_deny(&rule),
            RememberScope::SessionAllowAll => {
                store.allow_all_remaining();
                Ok(())
            }
        }
    }

    /// Parse and apply a `/session ...` operator command.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError` for malformed commands or bad patterns.
    pub fn handle_session_command(&self, input: &str) -> Result<String, PolicyError> {
        self.store().apply(SessionCommand::parse(input)?)
    }
}
