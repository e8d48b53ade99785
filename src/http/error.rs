use reqwest::StatusCode;
use thiserror::Error;

/// What the final attempt of an exhausted request ran into.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("status {0}")]
    Status(StatusCode),
    #[error(transparent)]
    Transport(reqwest::Error),
    #[error("no attempt was made")]
    NoAttempt,
}

#[derive(Debug, Error)]
pub enum HttpError {
    /// The resource is gone (skip set, 404/410 by default); never retried.
    #[error("resource gone: {status} {url}")]
    Terminal { status: StatusCode, url: String },
    #[error("unexpected status {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Failure,
    },
    #[error(transparent)]
    Transport(reqwest::Error),
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl HttpError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HttpError::Terminal { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Terminal { status, .. } | HttpError::Status { status, .. } => Some(*status),
            HttpError::RetriesExhausted {
                last: Failure::Status(status),
                ..
            } => Some(*status),
            _ => None,
        }
    }
}
