use std::time::Duration;

use crate::ApprovalChannel;
use crate::error::ChannelError;
use crate::request::{ApprovalOutcome, ApprovalRequest, ApprovalResponse};

const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Posts each request to a remote approver and waits for its JSON verdict.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl WebhookChannel {
    /// # Errors
    ///
    /// Returns `ChannelError::Http` if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("toolgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Read the body, giving up as soon as it is known to exceed
/// `MAX_RESPONSE_BYTES`.
async fn read_capped(mut resp: reqwest::Response) -> Result<Vec<u8>, ChannelError> {
    if let Some(declared) = resp.content_length() {
        let declared = usize::try_from(declared).unwrap_or(usize::MAX);
        if declared > MAX_RESPONSE_BYTES {
            return Err(ChannelError::ResponseTooLarge(declared));
        }
    }
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        append_capped(&mut body, &chunk)?;
    }
    Ok(body)
}

fn append_capped(body: &mut Vec<u8>, chunk: &[u8]) -> Result<(), ChannelError> {
    let len = body.len() + chunk.len();
    if len > MAX_RESPONSE_BYTES {
        return Err(ChannelError::ResponseTooLarge(len));
    }
    body.extend_from_slice(chunk);
    Ok(())
}

impl ApprovalChannel for WebhookChannel {
    async fn request(&self, request: &ApprovalRequest) -> Result<ApprovalOutcome, ChannelError> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(request.timeout_seconds()))
            .json(request);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ChannelError::Status(resp.status()));
        }
        let bytes = read_capped(resp).await?;

        let response: ApprovalResponse = serde_json::from_slice(&bytes)?;
        if response.request_id != request.request_id() {
            return Err(ChannelError::RequestIdMismatch {
                expected: request.request_id(),
                got: response.request_id,
            });
        }
        tracing::debug!(
            request_id = %response.request_id,
            decision = ?response.decision,
            "webhook approval answered"
        );
        Ok(response.into())
    }
}
