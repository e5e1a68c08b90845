use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ApprovalChannel;
use crate::error::ChannelError;
use crate::request::{ApprovalOutcome, ApprovalRequest, ApprovalResponse};

const REQUESTS_DIR: &str = "requests";
const RESPONSES_DIR: &str = "responses";

/// Exchanges requests and responses as JSON files under a shared directory.
///
/// Requests land in `{base}/requests/{id}.json`; the approver writes
/// `{base}/responses/{id}.json`. Both files are removed once the request
/// resolves or the waiting future is dropped.
#[derive(Debug, Clone)]
pub struct FileDropChannel {
    base_path: PathBuf,
    poll_interval: Duration,
}

impl FileDropChannel {
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            base_path: base_path.into(),
            poll_interval,
        }
    }

    #[must_use]
    pub fn request_path(&self, request: &ApprovalRequest) -> PathBuf {
        self.base_path
            .join(REQUESTS_DIR)
            .join(format!("{}.json", request.request_id()))
    }

    #[must_use]
    pub fn response_path(&self, request: &ApprovalRequest) -> PathBuf {
        self.base_path
            .join(RESPONSES_DIR)
            .join(format!("{}.json", request.request_id()))
    }
}

/// Removes the exchanged files when dropped, including on timeout.
struct Exchange {
    request: PathBuf,
    response: PathBuf,
}

impl Drop for Exchange {
    fn drop(&mut self) {
        for path in [&self.request, &self.response] {
            if let Err(e) = std::fs::remove_file(path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), "failed to remove approval file: {e}");
            }
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ChannelError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

impl ApprovalChannel for FileDropChannel {
    async fn request(&self, request: &ApprovalRequest) -> Result<ApprovalOutcome, ChannelError> {
        tokio::fs::create_dir_all(self.base_path.join(REQUESTS_DIR)).await?;
        tokio::fs::create_dir_all(self.base_path.join(RESPONSES_DIR)).await?;

        let exchange = Exchange {
            request: self.request_path(request),
            response: self.response_path(request),
        };
        write_atomic(&exchange.request, &serde_json::to_vec_pretty(request)?).await?;
        tracing::debug!(path = %exchange.request.display(), "approval request written");

        loop {
            match tokio::fs::read(&exchange.response).await {
                Ok(bytes) => match serde_json::from_slice::<ApprovalResponse>(&bytes) {
                    Ok(response) if response.request_id == request.request_id() => {
                        tracing::debug!(
                            request_id = %response.request_id,
                            decision = ?response.decision,
                            "file-drop approval answered"
                        );
                        return Ok(response.into());
                    }
                    Ok(response) => {
                        return Err(ChannelError::RequestIdMismatch {
                            expected: request.request_id(),
                            got: response.request_id,
                        });
                    }
                    // Partially written; try again next tick.
                    Err(e) => tracing::trace!("response not ready: {e}"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
