use std::time::Duration;

use crate::ApprovalChannel;
use crate::config::{ChannelConfig, ChannelKind};
use crate::error::ChannelError;
use crate::file_drop::FileDropChannel;
use crate::interactive::InteractiveChannel;
use crate::request::{ApprovalOutcome, ApprovalRequest};
use crate::webhook::WebhookChannel;

/// Headless channel: every question is answered with a deny.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyChannel;

impl ApprovalChannel for DenyChannel {
    async fn request(&self, _request: &ApprovalRequest) -> Result<ApprovalOutcome, ChannelError> {
        Ok(ApprovalOutcome::deny_once().with_reason("no approval channel available"))
    }
}

/// Enum dispatch for runtime channel selection.
#[derive(Debug, Clone)]
pub enum AnyApprovalChannel {
    Interactive(InteractiveChannel),
    Webhook(WebhookChannel),
    FileDrop(FileDropChannel),
    Deny(DenyChannel),
}

macro_rules! dispatch_approval {
    ($self:expr, $method:ident $(, $arg:expr)*) => {
        match $self {
            AnyApprovalChannel::Interactive(c) => c.$method($($arg),*).await,
            AnyApprovalChannel::Webhook(c) => c.$method($($arg),*).await,
            AnyApprovalChannel::FileDrop(c) => c.$method($($arg),*).await,
            AnyApprovalChannel::Deny(c) => c.$method($($arg),*).await,
        }
    };
}

impl AnyApprovalChannel {
    /// Build the channel selected by configuration.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Config` if required fields are missing, or
    /// `ChannelError::Http` if the webhook client cannot be built.
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ChannelError> {
        config.validate()?;
        let channel = match config.kind {
            ChannelKind::Console => Self::Interactive(InteractiveChannel::default()),
            ChannelKind::Webhook => {
                let endpoint = config.endpoint.clone().unwrap_or_default();
                Self::Webhook(WebhookChannel::new(
                    endpoint,
                    config.token.clone(),
                    Duration::from_secs(config.timeout),
                )?)
            }
            ChannelKind::File => {
                let base = config.base_path.clone().unwrap_or_default();
                Self::FileDrop(FileDropChannel::new(base, config.poll_interval()))
            }
            ChannelKind::Deny => Self::Deny(DenyChannel),
        };
        tracing::debug!(kind = config.kind.as_str(), "approval channel ready");
        Ok(channel)
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Interactive(_) => ChannelKind::Console,
            Self::Webhook(_) => ChannelKind::Webhook,
            Self::FileDrop(_) => ChannelKind::File,
            Self::Deny(_) => ChannelKind::Deny,
        }
    }
}

impl ApprovalChannel for AnyApprovalChannel {
    async fn request(&self, request: &ApprovalRequest) -> Result<ApprovalOutcome, ChannelError> {
        dispatch_approval!(self, request, request)
    }
}
