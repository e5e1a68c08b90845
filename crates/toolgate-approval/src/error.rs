use uuid::Uuid;

/// Failure to obtain an answer from an approval channel.
///
/// Every variant is handled as a timeout by the caller: the call is denied.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("response body too large ({0} bytes)")]
    ResponseTooLarge(usize),

    #[error("malformed approval response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response is for request {got}, expected {expected}")]
    RequestIdMismatch { expected: Uuid, got: Uuid },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("invalid channel configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_display() {
        let expected = Uuid::nil();
        let got = Uuid::max();
        let err = ChannelError::RequestIdMismatch { expected, got };
        assert_eq!(
            err.to_string(),
            format!("response is for request {got}, expected {expected}")
        );
    }

    #[test]
    fn status_display() {
        let err = ChannelError::Status(reqwest::StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "webhook returned HTTP 502 Bad Gateway");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ChannelError = io.into();
        assert!(matches!(err, ChannelError::Io(_)));
    }
}
