//! Completion service errors and their retry classification

use std::time::Duration;
use thiserror::Error;

/// Why a completion call produced no usable text
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP 429; the service told us when to come back
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// HTTP 402 from DeepSeek: the account is out of credit
    #[error("Insufficient account balance: {0}")]
    InsufficientBalance(String),

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// A 200 response whose message content was empty
    #[error("Completion came back empty")]
    EmptyCompletion,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Request timeouts, rate limits and server-side failures
fn transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

impl LlmError {
    /// Transient failures are worth another attempt with the same prompt
    ///
    /// An empty completion counts as transient: sampling again usually
    /// produces text.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::ApiError { status, .. } => transient_status(*status),
            LlmError::RateLimited { .. } | LlmError::Network(_) | LlmError::Timeout(_) | LlmError::EmptyCompletion => {
                true
            }
            LlmError::InsufficientBalance(_)
            | LlmError::InvalidResponse(_)
            | LlmError::Json(_)
            | LlmError::Config(_) => false,
        }
    }

    /// Server-requested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
