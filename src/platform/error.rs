use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Failure of a GET after the retry policy gave up.
#[derive(Debug, Clone, Error)]
#[error("GET {url} failed after {attempts} attempt(s): {reason}")]
pub struct TransportError {
    pub url: String,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("signing key error: {0}")]
    Signing(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("API error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("invalid source: {0}")]
    InvalidSource(String),
}

impl PlatformError {
    /// Short stable label, used as a metrics/log field.
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::Signing(_) => "signing",
            PlatformError::Session(_) => "session",
            PlatformError::Api { .. } => "api",
            PlatformError::Transport(_) => "transport",
            PlatformError::Decode(_) => "decode",
            PlatformError::DeadlineExceeded(_) => "deadline",
            PlatformError::InvalidSource(_) => "invalid_source",
        }
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        PlatformError::Decode(err.to_string())
    }
}
