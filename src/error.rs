use thiserror::Error;

/// Failures talking to the remote highlights API. The client performs no
/// retries itself; the orchestrator treats every variant uniformly as a
/// retryable error subject to its consecutive-failure threshold.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote returned status {0}")]
    Status(u16),
    #[error("failed to decode remote payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures in the vault/file collaborator. Per-item resolution failures are
/// logged and skipped by the orchestrator, never fatal to a run.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not a valid vault path: {0}")]
    InvalidPath(String),
}

impl VaultError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        VaultError::Io {
            path: path.into(),
            source,
        }
    }
}
