use std::sync::Arc;

use dialoguer::Select;

use crate::error::ChannelError;
use crate::request::{ApprovalOutcome, ApprovalRequest, RememberScope};
use crate::ApprovalChannel;

/// Answers offered by the console prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveChoice {
    AllowOnce,
    DenyOnce,
    AllowSession,
    DenySession,
    AllowAllSession,
}

impl InteractiveChoice {
    pub const ALL: [Self; 5] = [
        Self::AllowOnce,
        Self::DenyOnce,
        Self::AllowSession,
        Self::DenySession,
        Self::AllowAllSession,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::AllowOnce => "Allow once",
            Self::DenyOnce => "Deny once",
            Self::AllowSession => "Always allow this tool for the session",
            Self::DenySession => "Always deny this tool for the session",
            Self::AllowAllSession => "Allow everything for the rest of the session",
        }
    }

    #[must_use]
    pub fn into_outcome(self) -> ApprovalOutcome {
        match self {
            Self::AllowOnce => ApprovalOutcome::allow_once(),
            Self::DenyOnce => ApprovalOutcome::deny_once(),
            Self::AllowSession => {
                ApprovalOutcome::allow_once().remembered(RememberScope::SessionWhitelist)
            }
            Self::DenySession => {
                ApprovalOutcome::deny_once().remembered(RememberScope::SessionBlacklist)
            }
            Self::AllowAllSession => {
                ApprovalOutcome::allow_once().remembered(RememberScope::SessionAllowAll)
            }
        }
    }
}

/// Blocking source of an `InteractiveChoice`. Runs on a blocking thread.
pub trait Prompter: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns `ChannelError::Prompt` if no answer could be read.
    fn choose(&self, request: &ApprovalRequest) -> Result<InteractiveChoice, ChannelError>;
}

/// Terminal prompt on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialoguerPrompter;

impl Prompter for DialoguerPrompter {
    fn choose(&self, request: &ApprovalRequest) -> Result<InteractiveChoice, ChannelError> {
        let args = serde_json::to_string_pretty(request.arguments())?;
        eprintln!(
            "\nTool `{}` requests permission\n  intent: {}\n  arguments: {args}",
            request.tool_name(),
            request.intent(),
        );
        let labels = InteractiveChoice::ALL.map(InteractiveChoice::label);
        let index = Select::new()
            .with_prompt(format!(
                "Approve? (denied automatically after {}s)",
                request.timeout_seconds()
            ))
            .items(labels)
            .default(1)
            .interact()
            .map_err(|e| ChannelError::Prompt(e.to_string()))?;
        InteractiveChoice::ALL
            .get(index)
            .copied()
            .ok_or_else(|| ChannelError::Prompt(format!("invalid selection {index}")))
    }
}

/// Local console channel.
///
/// The prompt runs on a blocking thread; if the caller times out, the thread
/// stays parked on the terminal until input arrives, and its answer is dropped.
#[derive(Clone)]
pub struct InteractiveChannel {
    prompter: Arc<dyn Prompter>,
}

impl std::fmt::Debug for InteractiveChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveChannel").finish_non_exhaustive()
    }
}

impl Default for InteractiveChannel {
    fn default() -> Self {
        Self::new(DialoguerPrompter)
    }
}

impl InteractiveChannel {
    #[must_use]
    pub fn new(prompter: impl Prompter) -> Self {
        Self {
            prompter: Arc::new(prompter),
        }
    }
}

impl ApprovalChannel for InteractiveChannel {
    async fn request(&self, request: &ApprovalRequest) -> Result<ApprovalOutcome, ChannelError> {
        let prompter = Arc::clone(&self.prompter);
        let request = request.clone();
        let choice = tokio::task::spawn_blocking(move || prompter.choose(&request))
            .await
            .map_err(|e| ChannelError::Prompt(format!("prompt thread failed: {e}")))??;
        tracing::debug!(?choice, "interactive approval answered");
        Ok(choice.into_outcome())
    }
}
