use thiserror::Error;

use crate::worker::WorkerState;

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Network unavailable: {0}")]
    Offline(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to cache {url}: {reason}")]
    Install { url: String, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] anyhow::Error),

    #[error("Client error: {0}")]
    Clients(anyhow::Error),

    #[error("Invalid worker state: expected {expected}, got {actual}")]
    InvalidState {
        expected: WorkerState,
        actual: WorkerState,
    },

    #[error("Cache {0} is not installed")]
    NotInstalled(String),

    #[error("Worker host has shut down")]
    HostClosed,
}

impl WorkerError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.chars().count() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
            format!("{}... (truncated, {} total bytes)", head, body.len())
        }
    }

    /// Build an install error for an asset that answered with a bad status.
    pub fn bad_status(url: &str, status: u16, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let reason = if text.trim().is_empty() {
            format!("status {}", status)
        } else {
            format!("status {}: {}", status, Self::truncate_body(text.trim()))
        };
        WorkerError::Install {
            url: url.to_string(),
            reason,
        }
    }
}
