//! Error types for apkx.

use thiserror::Error;

/// Main error type for apkx.
#[derive(Error, Debug)]
pub enum ApkxError {
    #[error("Invalid worker count {0}: at least 2 concurrent workers are required")]
    InvalidWorkerCount(usize),

    #[error("Invalid timeout {timeout}s: must be at least {minimum}s")]
    TimeoutTooShort { timeout: u64, minimum: u64 },

    #[error("Subordinate error: {0}")]
    Subordinate(String),

    #[error("Analyzer error: {0}")]
    Analyzer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApkxError {
    /// Whether this error was raised while validating the call configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidWorkerCount(_) | Self::TimeoutTooShort { .. }
        )
    }
}

/// Result type alias for apkx operations.
pub type Result<T> = std::result::Result<T, ApkxError>;
