use std::path::PathBuf;

/// Errors raised by the session client.
///
/// The bootstrapper treats all of these as "not signed in"; they are
/// surfaced for logging and for callers driving [`super::AuthApi`] directly.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected the session")]
    Unauthenticated,

    #[error("Server returned status {0}")]
    Status(u16),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to access token storage at {1}: {0}")]
    StorageIo(#[source] std::io::Error, PathBuf),

    #[error("Token storage is corrupt: {0}")]
    StorageFormat(#[from] serde_json::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
