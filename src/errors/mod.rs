/// Unified error handling module
use thiserror::Error;

/// Failure of a single fetch operation.
///
/// `Clone` so settled results can be published through watch channels to
/// every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The cancellation token fired. Never retried, never user-visible.
    #[error("request cancelled")]
    Cancelled,
    /// The upstream answered with a non-success status after the retry budget ran out.
    #[error("HTTP error: {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// Short upstream code for log lines
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Cancelled => "CANCELLED",
            FetchError::Status(status) => match status {
                403 => "UPSTREAM_403",
                404 => "UPSTREAM_404",
                429 => "UPSTREAM_429",
                500..=599 => "UPSTREAM_5XX",
                _ => "UPSTREAM_ERROR",
            },
            FetchError::Transport(_) => "UPSTREAM_UNREACHABLE",
            FetchError::Malformed(_) => "MALFORMED_RESPONSE",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if !status.is_success() => FetchError::Status(status.as_u16()),
            _ => FetchError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

/// Type alias for fetch results
pub type FetchResult<T> = Result<T, FetchError>;
